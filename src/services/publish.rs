//! Live-update publishing
//!
//! Writes and finished async runs are announced on a per-app channel
//! (`app:<appId>`) so connected editors can refresh.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Channel name for an app's live updates
pub fn app_channel(app_id: &str) -> String {
    format!("app:{}", app_id)
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value);
}

/// One published message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, event: &str, payload: Value) {
        tracing::debug!("📣 {} -> {}", event, channel);
        // No subscribers is not an error
        let _ = self.sender.send(PublishedEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let publisher = BroadcastPublisher::default();
        let mut rx = publisher.subscribe();
        publisher
            .publish(&app_channel("3"), "table:changed", json!({ "tableName": "app_3_x" }))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "app:3");
        assert_eq!(event.event, "table:changed");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        BroadcastPublisher::new(4).publish("app:1", "noop", Value::Null).await;
    }
}
