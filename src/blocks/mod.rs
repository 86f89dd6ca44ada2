//! Block registry and dispatch
//!
//! Blocks are a closed set keyed by label. Graph validation resolves every
//! label up front, so dispatch never meets an unknown block. Executors get a
//! read-only view of the context and return a `BlockOutcome`; configuration
//! problems are reported as a failed result, never as a panic.

mod ai;
mod auth;
mod conditions;
mod database;
mod email;
mod files;
mod http;
mod triggers;

use crate::datatable::TableService;
use crate::error::BlockError;
use crate::services::{Mailer, MediaStore, Summarizer};
use crate::workflow::context::{ContextUpdates, ExecutionContext};
use crate::workflow::types::{BlockCategory, BlockResult, Node};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Every block the engine can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Block {
    OnSubmit,
    OnLogin,
    OnPageLoad,
    Webhook,
    Match,
    IsFilled,
    AuthVerify,
    DbFind,
    DbCreate,
    DbUpdate,
    HttpRequest,
    FileUpload,
    FileDownload,
    EmailSend,
    AiSummarize,
}

impl Block {
    pub const ALL: [Block; 15] = [
        Block::OnSubmit,
        Block::OnLogin,
        Block::OnPageLoad,
        Block::Webhook,
        Block::Match,
        Block::IsFilled,
        Block::AuthVerify,
        Block::DbFind,
        Block::DbCreate,
        Block::DbUpdate,
        Block::HttpRequest,
        Block::FileUpload,
        Block::FileDownload,
        Block::EmailSend,
        Block::AiSummarize,
    ];

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|block| block.label() == label)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Block::OnSubmit => "onSubmit",
            Block::OnLogin => "onLogin",
            Block::OnPageLoad => "onPageLoad",
            Block::Webhook => "webhook",
            Block::Match => "match",
            Block::IsFilled => "isFilled",
            Block::AuthVerify => "auth.verify",
            Block::DbFind => "db.find",
            Block::DbCreate => "db.create",
            Block::DbUpdate => "db.update",
            Block::HttpRequest => "http.request",
            Block::FileUpload => "file.upload",
            Block::FileDownload => "file.download",
            Block::EmailSend => "email.send",
            Block::AiSummarize => "ai.summarize",
        }
    }

    pub const fn category(&self) -> BlockCategory {
        match self {
            Block::OnSubmit | Block::OnLogin | Block::OnPageLoad | Block::Webhook => BlockCategory::Trigger,
            Block::Match | Block::IsFilled | Block::AuthVerify => BlockCategory::Condition,
            _ => BlockCategory::Action,
        }
    }
}

/// What a block produced
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    pub result: BlockResult,
    /// Context writes for the engine to apply
    pub updates: ContextUpdates,
    /// Value written to `config.outputVariable` on success
    pub output: Option<Value>,
}

impl BlockOutcome {
    pub fn success(block: Block, payload: Map<String, Value>) -> Self {
        Self {
            result: BlockResult::ok(block.label(), payload),
            updates: Vec::new(),
            output: None,
        }
    }

    pub fn failure(block: Block, error: impl Into<String>) -> Self {
        Self {
            result: BlockResult::failed(block.label(), error),
            updates: Vec::new(),
            output: None,
        }
    }

    /// Failure for a missing configuration field
    pub fn missing(block: Block, field: &str) -> Self {
        Self::failure(block, format!("{} is required", field))
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.push((key.into(), value));
        self
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.result.payload.insert(key.to_string(), value);
        self
    }
}

/// Tunables shared by the executors
#[derive(Debug, Clone)]
pub struct BlockSettings {
    pub jwt_secret: String,
    pub max_file_size: u64,
    pub http_timeout: Duration,
    pub provider_retry_delay: Duration,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            max_file_size: 10 * 1024 * 1024,
            http_timeout: Duration::from_secs(30),
            provider_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Collaborators the executors call out to
pub struct BlockServices {
    pub tables: Arc<TableService>,
    pub media: Arc<dyn MediaStore>,
    pub mailer: Arc<dyn Mailer>,
    pub summarizer: Arc<dyn Summarizer>,
    pub http: reqwest::Client,
    pub settings: BlockSettings,
}

/// Everything one dispatch can see
pub struct BlockEnv<'a> {
    pub node_id: &'a str,
    /// Node configuration with templates already resolved
    pub config: Map<String, Value>,
    pub context: &'a ExecutionContext,
    pub app_id: &'a str,
    pub user_id: &'a str,
    pub services: &'a BlockServices,
}

impl BlockEnv<'_> {
    /// Non-empty string config value
    pub fn str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Run `node` as `block` against the current context
///
/// Errors from executors become failed results here; the walk never aborts
/// because of a single block.
pub async fn dispatch(
    block: Block,
    node: &Node,
    context: &ExecutionContext,
    app_id: &str,
    user_id: &str,
    services: &BlockServices,
) -> BlockOutcome {
    let config = match context.resolve_templates(&Value::Object(node.config.clone())) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let env = BlockEnv {
        node_id: &node.id,
        config,
        context,
        app_id,
        user_id,
        services,
    };

    let executed: Result<BlockOutcome, BlockError> = match block {
        Block::OnSubmit | Block::OnLogin | Block::OnPageLoad | Block::Webhook => {
            Ok(triggers::execute(block, &env))
        }
        Block::Match => Ok(conditions::execute_match(&env)),
        Block::IsFilled => Ok(conditions::execute_is_filled(&env)),
        Block::AuthVerify => Ok(auth::execute(&env)),
        Block::DbFind => database::execute_find(&env).await,
        Block::DbCreate => database::execute_create(&env).await,
        Block::DbUpdate => database::execute_update(&env).await,
        Block::HttpRequest => http::execute(&env).await,
        Block::FileUpload => files::execute_upload(&env).await,
        Block::FileDownload => files::execute_download(&env).await,
        Block::EmailSend => email::execute(&env).await,
        Block::AiSummarize => ai::execute(&env).await,
    };

    let mut outcome = executed.unwrap_or_else(|e| {
        tracing::warn!("⚠️ Block '{}' ({}) failed: {}", node.id, block.label(), e);
        BlockOutcome::failure(block, e.to_string())
    });

    if outcome.result.success {
        if let Some(variable) = env.str("outputVariable") {
            let value = outcome
                .output
                .clone()
                .unwrap_or_else(|| Value::Object(outcome.result.payload.clone()));
            outcome.updates.push((variable.to_string(), value));
        }
    }
    outcome
}

/// Accept a comma-separated string or an array of strings
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn labels_round_trip() {
        for block in Block::ALL {
            assert_eq!(Block::from_label(block.label()), Some(block));
        }
        assert_eq!(Block::from_label("db.drop"), None);
        assert_eq!(Block::from_label("DB.FIND"), None);
    }

    #[test]
    fn categories_follow_labels() {
        assert_eq!(Block::Webhook.category(), BlockCategory::Trigger);
        assert_eq!(Block::AuthVerify.category(), BlockCategory::Condition);
        assert_eq!(Block::AiSummarize.category(), BlockCategory::Action);
    }

    #[test]
    fn splits_string_lists() {
        assert_eq!(string_list(Some(&json!("a, b,,c"))), vec!["a", "b", "c"]);
        assert_eq!(string_list(Some(&json!(["x", 1, " y "]))), vec!["x", "y"]);
        assert!(string_list(None).is_empty());
    }
}
