//! Per-user sliding-window rate limiting for dynamic-table operations
//!
//! The limiter is a strategy trait so a shared implementation (for example a
//! Redis token bucket) can replace the process-local one when several engine
//! instances run side by side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Operation classes with independent ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Create,
    Update,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests allowed per window for each operation class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub reads_per_window: usize,
    pub updates_per_window: usize,
    pub creates_per_window: usize,
    pub window_secs: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            reads_per_window: 100,
            updates_per_window: 50,
            creates_per_window: 20,
            window_secs: 60,
        }
    }
}

impl RateLimits {
    pub fn ceiling(&self, operation: Operation) -> usize {
        match operation {
            Operation::Read => self.reads_per_window,
            Operation::Update => self.updates_per_window,
            Operation::Create => self.creates_per_window,
        }
    }
}

/// Rate limiting strategy
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt and report whether it is within the limit
    ///
    /// Rejected attempts are not recorded and are never queued for later.
    async fn check(&self, user_id: &str, operation: Operation) -> bool;
}

type Key = (String, Operation);

#[derive(Debug)]
struct Windows {
    hits: HashMap<Key, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl Windows {
    /// Drop every key whose newest hit has left the window
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.hits
            .retain(|_, times| times.back().is_some_and(|t| now.duration_since(*t) < window));
        self.last_sweep = now;
    }
}

/// Process-local sliding window limiter keyed by `(user, operation)`
///
/// Keys with no hit inside the window are evicted, so memory tracks active
/// users only.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limits: RateLimits,
    windows: Mutex<Windows>,
}

impl SlidingWindowLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(Windows {
                hits: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.limits.window_secs)
    }

    /// Number of `(user, operation)` keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.hits.len()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, user_id: &str, operation: Operation) -> bool {
        let now = Instant::now();
        let window = self.window();
        let ceiling = self.limits.ceiling(operation);

        let mut windows = self.windows.lock().await;
        if now.duration_since(windows.last_sweep) >= window {
            windows.sweep(now, window);
        }

        let key = (user_id.to_string(), operation);
        let entry = windows.hits.entry(key.clone()).or_default();
        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= ceiling {
            tracing::warn!("⛔ Rate limit hit: user '{}' {} ({}/{})", user_id, operation, entry.len(), ceiling);
            if entry.is_empty() {
                windows.hits.remove(&key);
            }
            return false;
        }

        entry.push_back(now);
        true
    }
}

/// Limiter that never rejects, for trusted internal callers
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn check(&self, _user_id: &str, _operation: Operation) -> bool {
        true
    }
}
