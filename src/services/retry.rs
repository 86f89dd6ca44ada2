//! Bounded exponential backoff for provider calls

use crate::error::ProviderError;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;

/// Attempts made for a call that keeps hitting provider rate limits
pub const MAX_ATTEMPTS: u32 = 3;

/// Run `call` until it succeeds, fails permanently, or `attempts` are used up
///
/// Only `ProviderError::RateLimited` is transient. The delay doubles after
/// each attempt starting at `base_delay`, unless the provider sent
/// `Retry-After`.
pub async fn with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(base_delay)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    let operation = || {
        attempt += 1;
        let current = attempt;
        let pending = call();
        async move {
            match pending.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() && current < attempts => {
                    tracing::warn!("⏳ Provider rate limited (attempt {}/{}), retrying", current, attempts);
                    match e {
                        ProviderError::RateLimited { retry_after: Some(secs) } => {
                            Err(backoff::Error::retry_after(e, Duration::from_secs(secs)))
                        }
                        e => Err(backoff::Error::transient(e)),
                    }
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    };
    retry(policy, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_backoff(MAX_ATTEMPTS, Duration::from_millis(100), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::RateLimited { retry_after: None })
        })
        .await;

        assert_eq!(result, Err(ProviderError::RateLimited { retry_after: None }));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_a_rate_limit() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_backoff(MAX_ATTEMPTS, Duration::from_millis(100), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::RateLimited { retry_after: Some(1) })
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_keys_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_backoff(MAX_ATTEMPTS, Duration::from_millis(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::InvalidApiKey)
        })
        .await;
        assert_eq!(result, Err(ProviderError::InvalidApiKey));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
