//! Rate Limiting
//!
//! Fixed-window counter keyed by actor. The counter lives behind a trait so
//! a multi-instance deployment can back it with a shared store — per-process
//! memory is not a valid shared resource under horizontal scaling.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::{StoreError, WorkflowError};

/// Shared counter surface: increment `key` within a fixed window and return
/// the count including this call.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
}

/// Single-process counter store. Suitable for tests and single-instance
/// deployments only.
#[derive(Default)]
pub struct InMemoryCounterStore {
    windows: Mutex<HashMap<String, (DateTime<Utc>, u64)>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert((now, 0));
        if now - entry.0 >= window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        Ok(entry.1)
    }
}

/// Fixed-window limiter over a counter store.
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(counters: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { counters, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(InMemoryCounterStore::new()), config)
    }

    /// Count one mutating operation for the actor; error once the window
    /// budget is exhausted.
    pub async fn check(&self, actor_id: Uuid) -> Result<(), WorkflowError> {
        let key = format!("ops:{}", actor_id);
        let count = self
            .counters
            .increment(&key, Duration::seconds(self.config.window_secs as i64))
            .await?;
        if count > self.config.max_operations {
            tracing::warn!(actor_id = %actor_id, count, "rate limit exceeded");
            return Err(WorkflowError::RateLimited {
                retry_after_secs: self.config.window_secs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_enforced_within_window() {
        let limiter = RateLimiter::in_memory(RateLimitConfig {
            max_operations: 2,
            window_secs: 60,
        });
        let actor = Uuid::new_v4();

        assert!(limiter.check(actor).await.is_ok());
        assert!(limiter.check(actor).await.is_ok());
        let err = limiter.check(actor).await.unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");
    }

    #[tokio::test]
    async fn test_actors_are_independent() {
        let limiter = RateLimiter::in_memory(RateLimitConfig {
            max_operations: 1,
            window_secs: 60,
        });
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_err());
        assert!(limiter.check(b).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let store = InMemoryCounterStore::new();
        // A zero-length window expires immediately, so every call starts a
        // fresh window.
        assert_eq!(store.increment("k", Duration::zero()).await.unwrap(), 1);
        assert_eq!(store.increment("k", Duration::zero()).await.unwrap(), 1);
    }
}
