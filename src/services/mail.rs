//! Outbound email

use crate::error::MailError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub from: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand a message to the delivery backend and return its message id
    async fn send(&self, message: &EmailMessage) -> Result<String, MailError>;
}

/// Mailer that only logs, for development and tests
#[derive(Debug, Default, Clone)]
pub struct LogMailer {
    default_from: Option<String>,
}

impl LogMailer {
    pub fn new(default_from: Option<String>) -> Self {
        Self { default_from }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<String, MailError> {
        if message.to.is_empty() {
            return Err(MailError("no recipients".to_string()));
        }
        let from = message
            .from
            .as_deref()
            .or(self.default_from.as_deref())
            .unwrap_or("noreply@localhost");
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "✉️ Email {} from {} to {:?}: {}",
            id,
            from,
            message.to,
            message.subject
        );
        Ok(id)
    }
}
