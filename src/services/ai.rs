//! Text summarization through an OpenAI-compatible chat API

use crate::error::ProviderError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOptions {
    pub model: String,
    pub max_words: Option<u32>,
    pub instructions: Option<String>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_words: None,
            instructions: None,
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        api_key: &str,
        text: &str,
        options: &SummaryOptions,
    ) -> Result<String, ProviderError>;
}

pub struct OpenAiSummarizer {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiSummarizer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn build_payload(text: &str, options: &SummaryOptions) -> Value {
        let mut instructions = options
            .instructions
            .clone()
            .unwrap_or_else(|| "Summarize the following document.".to_string());
        if let Some(words) = options.max_words {
            instructions.push_str(&format!(" Use at most {} words.", words));
        }
        json!({
            "model": options.model,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": text },
            ],
        })
    }

    fn map_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            401 | 403 => ProviderError::InvalidApiKey,
            429 => ProviderError::RateLimited { retry_after },
            _ => ProviderError::Status { status, message: body },
        }
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(
        &self,
        api_key: &str,
        text: &str,
        options: &SummaryOptions,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&Self::build_payload(text, options))
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_error(status, retry_after, body));
        }

        let body: Value = response.json().await?;
        body.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|choices| choices.first())
            .and_then(|c| c.pointer("/message/content"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::Status {
                status,
                message: "response contained no summary".to_string(),
            })
    }
}
