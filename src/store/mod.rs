//! Shared store capability.
//!
//! The limiters only need two things from the store: run one transaction
//! atomically, and answer a liveness probe. Any store that can do both can
//! back a limiter; this module ships a Redis implementation and an
//! in-process one.

mod memory;
mod redis_store;

use async_trait::async_trait;

use crate::error::TransactionError;
use crate::ratelimit::{BucketKeys, BucketParams};

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

/// A read-modify-write transaction the store must execute atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    /// Refill a token bucket and try to take `requested` tokens.
    ///
    /// Replies `1` when admitted and `0` when rejected.
    TokenBucket {
        keys: BucketKeys,
        params: BucketParams,
        /// Store clock, in whole seconds
        now: i64,
        requested: u32,
    },
    /// Count one event in a fixed window of `period_ms` milliseconds.
    ///
    /// Replies `1` (allowed), `2` (hit quota) or `3` (over quota).
    PeriodWindow {
        key: String,
        quota: u32,
        period_ms: u64,
    },
}

/// A shared key-value store able to run [`Transaction`]s atomically.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Execute a transaction as one indivisible round trip and return its
    /// integer reply.
    async fn evaluate(&self, transaction: &Transaction) -> Result<i64, TransactionError>;

    /// No-op round trip used to detect that the store is reachable.
    async fn ping(&self) -> Result<(), TransactionError>;
}
