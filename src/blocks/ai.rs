//! `ai.summarize`: summarize a file referenced from the context

use super::{Block, BlockEnv, BlockOutcome};
use crate::error::{BlockError, ProviderError};
use crate::services::retry::{with_backoff, MAX_ATTEMPTS};
use crate::services::{FileDescriptor, SummaryOptions};
use serde_json::{json, Map, Value};

pub(super) async fn execute(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::AiSummarize;

    // The file is checked before the key so authors fix the flow first
    let Some(variable) = env.str("fileVariable") else {
        return Ok(BlockOutcome::missing(block, "fileVariable"));
    };
    let Some(raw) = env.context.lookup(variable).filter(|v| !v.is_null()) else {
        return Ok(BlockOutcome::failure(
            block,
            format!("File variable '{}' not found in context", variable),
        ));
    };
    let Some(api_key) = env.str("apiKey") else {
        return Ok(BlockOutcome::missing(block, "apiKey"));
    };

    let file = match raw {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    let Ok(file) = serde_json::from_value::<FileDescriptor>(file) else {
        return Ok(BlockOutcome::failure(
            block,
            format!("Context variable '{}' does not hold a file", variable),
        ));
    };

    let text = env.services.media.read_text(&file).await?;
    if text.trim().is_empty() {
        return Ok(BlockOutcome::failure(block, format!("File '{}' is empty", file.name)));
    }

    let mut options = SummaryOptions::default();
    if let Some(model) = env.str("model") {
        options.model = model.to_string();
    }
    if let Some(words) = env.u64("maxWords") {
        let Ok(words) = u32::try_from(words) else {
            return Ok(BlockOutcome::failure(
                block,
                format!("maxWords must not exceed {}", u32::MAX),
            ));
        };
        options.max_words = Some(words);
    }
    options.instructions = env.str("instructions").map(String::from);

    let summarizer = env.services.summarizer.as_ref();
    let (text_ref, options_ref) = (&text, &options);
    let summary = with_backoff(MAX_ATTEMPTS, env.services.settings.provider_retry_delay, move || {
        summarizer.summarize(api_key, text_ref, options_ref)
    })
    .await;

    let summary = match summary {
        Ok(summary) => summary,
        Err(ProviderError::InvalidApiKey) => {
            return Ok(BlockOutcome::failure(block, "Invalid API key for AI provider"))
        }
        Err(ProviderError::RateLimited { .. }) => {
            return Ok(BlockOutcome::failure(
                block,
                "AI provider rate limit exceeded, try again later",
            ))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("🧠 Summarized '{}' ({} chars)", file.name, text.len());
    let mut payload = Map::new();
    payload.insert("summary".into(), json!(summary));
    payload.insert("fileName".into(), json!(file.name));
    Ok(BlockOutcome::success(block, payload).with_output(json!(summary)))
}
