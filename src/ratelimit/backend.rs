//! Rate limiter trait for abstracting local and distributed implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::bucket::LocalBucket;
use super::limiter::TokenLimiter;
use crate::store::SharedStore;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the distributed `TokenLimiter` and a plain
/// `LocalBucket` so callers can run with or without a shared store.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether `n` events may happen at `now`.
    async fn allow(&self, now: DateTime<Utc>, n: u32) -> bool;
}

#[async_trait]
impl<S: SharedStore + ?Sized + 'static> RateLimiterBackend for TokenLimiter<S> {
    async fn allow(&self, now: DateTime<Utc>, n: u32) -> bool {
        TokenLimiter::allow(self, now, n).await
    }
}

#[async_trait]
impl RateLimiterBackend for LocalBucket {
    async fn allow(&self, now: DateTime<Utc>, n: u32) -> bool {
        LocalBucket::allow(self, now, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::BucketParams;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    async fn drain(backend: &dyn RateLimiterBackend, now: DateTime<Utc>) -> usize {
        let mut admitted = 0;
        for _ in 0..12 {
            if backend.allow(now, 1).await {
                admitted += 1;
            }
        }
        admitted
    }

    #[tokio::test]
    async fn test_backends_agree_on_a_burst() {
        let params = BucketParams::new(5, 10).unwrap();
        let now = Utc::now();

        let local = LocalBucket::new(params);
        let distributed = TokenLimiter::new("backend", params, Arc::new(InMemoryStore::new()));

        assert_eq!(drain(&local, now).await, 10);
        assert_eq!(drain(&distributed, now).await, 10);
    }
}
