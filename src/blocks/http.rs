//! `http.request`: outbound HTTP with a timeout and 429 backoff

use super::{Block, BlockEnv, BlockOutcome};
use crate::error::{BlockError, ProviderError};
use crate::services::retry::{with_backoff, MAX_ATTEMPTS};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

struct HttpReply {
    status: u16,
    headers: Map<String, Value>,
    body: Value,
}

pub(super) async fn execute(env: &BlockEnv<'_>) -> Result<BlockOutcome, BlockError> {
    let block = Block::HttpRequest;
    let Some(url) = env.str("url") else {
        return Ok(BlockOutcome::missing(block, "url"));
    };
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Ok(BlockOutcome::failure(block, "url must be an absolute http(s) URL"));
    }
    let method = match Method::from_bytes(env.str("method").unwrap_or("GET").to_ascii_uppercase().as_bytes()) {
        Ok(m) => m,
        Err(_) => return Ok(BlockOutcome::failure(block, "method is not a valid HTTP method")),
    };
    let timeout = env
        .u64("timeoutMs")
        .map(Duration::from_millis)
        .unwrap_or(env.services.settings.http_timeout);
    let headers = env.config.get("headers").and_then(Value::as_object).cloned().unwrap_or_default();
    let body = env.config.get("body").filter(|b| !b.is_null()).cloned();

    tracing::debug!("🌐 {} {}", method, url);
    let client = &env.services.http;
    let reply = with_backoff(MAX_ATTEMPTS, env.services.settings.provider_retry_delay, || {
        let mut request = client.request(method.clone(), url).timeout(timeout);
        for (name, value) in &headers {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.header(name.as_str(), value);
        }
        if let Some(body) = &body {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }
        async move {
            let response = request.send().await?;
            let status = response.status().as_u16();
            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(ProviderError::RateLimited { retry_after });
            }
            let headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), json!(v.to_str().ok()?))))
                .collect();
            let text = response.text().await?;
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            Ok(HttpReply { status, headers, body })
        }
    })
    .await?;

    let mut payload = Map::new();
    payload.insert("status".into(), json!(reply.status));
    payload.insert("headers".into(), Value::Object(reply.headers));
    payload.insert("body".into(), reply.body.clone());

    if (200..300).contains(&reply.status) {
        Ok(BlockOutcome::success(block, payload).with_output(reply.body))
    } else {
        let mut outcome = BlockOutcome::failure(block, format!("Request failed with status {}", reply.status));
        outcome.result.payload = payload;
        Ok(outcome)
    }
}
