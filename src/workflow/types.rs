//! Core workflow type definitions
//!
//! Nodes, edges and the request/response shapes of an execution. These are
//! (de)serialized as camelCase JSON, the format the visual editor produces.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Role of a block inside a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockCategory {
    #[serde(alias = "Trigger")]
    Trigger,
    #[serde(alias = "Condition")]
    Condition,
    #[serde(alias = "Action")]
    Action,
}

/// A single block placed in a workflow
///
/// Immutable during execution; templates in `config` are resolved against the
/// context at dispatch time without touching the node itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the workflow (e.g. "n1", "login-check")
    pub id: String,
    /// Block label such as `db.find` or `auth.verify`
    pub label: String,
    pub category: BlockCategory,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// Which way a Condition edge is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Branch {
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
}

impl Branch {
    pub fn from_bool(value: bool) -> Self {
        if value {
            Branch::True
        } else {
            Branch::False
        }
    }
}

// Editors send either "true"/"false" or real booleans
impl<'de> Deserialize<'de> for Branch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(Branch::from_bool(b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Branch::True),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Branch::False),
            other => Err(serde::de::Error::custom(format!(
                "branch must be \"true\" or \"false\", got {}",
                other
            ))),
        }
    }
}

/// Directed connection between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

/// A stored workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub app_id: String,
    /// Runs started by webhooks act on behalf of this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Ids of `webhook` trigger nodes listening on `source`
    pub fn webhook_triggers<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.nodes
            .iter()
            .filter(move |node| {
                node.label == "webhook"
                    && node.config.get("source").and_then(Value::as_str) == Some(source)
            })
            .map(|node| node.id.as_str())
    }
}

/// One execution: the graph, the seed context and who runs it
///
/// Used both as the body of `/workflow/execute` and as the queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    #[serde(deserialize_with = "string_or_number")]
    pub app_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Begin at this node instead of every node without incoming edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Result of one block, as returned to callers
///
/// Serializes flat: `{type, success, error?, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockResult {
    #[serde(rename = "type")]
    pub block_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl BlockResult {
    pub fn ok(block_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            block_type: block_type.into(),
            success: true,
            error: None,
            payload,
        }
    }

    pub fn failed(block_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            success: false,
            error: Some(error.into()),
            payload: Map::new(),
        }
    }

    /// Boolean outcome of a Condition, false when missing or failed
    pub fn condition_value(&self) -> bool {
        self.success && self.payload.get("result").and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub result: BlockResult,
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub results: Vec<NodeResult>,
    pub context: Map<String, Value>,
}

/// Accept ids sent as JSON strings or numbers
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}
