//! `email.send`

use super::{string_list, Block, BlockEnv, BlockOutcome};
use crate::error::BlockError;
use crate::services::EmailMessage;
use serde_json::{json, Map};

pub(super) async fn execute(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::EmailSend;
    let to = string_list(env.config.get("to"));
    if to.is_empty() {
        return Ok(BlockOutcome::missing(block, "to"));
    }
    let Some(subject) = env.str("subject") else {
        return Ok(BlockOutcome::missing(block, "subject"));
    };

    let message = EmailMessage {
        to,
        subject: subject.to_string(),
        body: env.str("body").unwrap_or_default().to_string(),
        from: env.str("from").map(String::from),
    };
    let message_id = env.services.mailer.send(&message).await?;

    let mut payload = Map::new();
    payload.insert("messageId".into(), json!(message_id));
    payload.insert("to".into(), json!(message.to));
    Ok(BlockOutcome::success(block, payload).with_output(json!(message_id)))
}
