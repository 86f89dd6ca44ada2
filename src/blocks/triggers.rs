//! Trigger blocks expose the slice of context their event seeded

use super::{Block, BlockEnv, BlockOutcome};
use serde_json::{Map, Value};

/// Context key each trigger reads
fn source_key(block: Block) -> &'static str {
    match block {
        Block::OnSubmit => "formData",
        Block::OnLogin => "user",
        Block::OnPageLoad => "page",
        _ => "webhook",
    }
}

pub(super) fn execute(block: Block, env: &BlockEnv<'_>) -> BlockOutcome {
    let key = source_key(block);
    let value = env
        .context
        .get(key)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    tracing::debug!("🎯 Trigger '{}' fired for node '{}'", block.label(), env.node_id);
    let mut payload = Map::new();
    payload.insert(key.to_string(), value.clone());
    BlockOutcome::success(block, payload).with_output(value)
}
