//! Process-local token bucket.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::params::BucketParams;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// A token bucket that lives entirely in this process.
///
/// The bucket starts full and refills continuously at `rate` tokens per
/// second. All reads and writes of the bucket state happen under one mutex.
#[derive(Debug)]
pub struct LocalBucket {
    params: BucketParams,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refreshed: Option<DateTime<Utc>>,
}

impl LocalBucket {
    /// Create a full bucket.
    pub fn new(params: BucketParams) -> Self {
        Self {
            params,
            state: Mutex::new(BucketState {
                tokens: params.capacity() as f64,
                last_refreshed: None,
            }),
        }
    }

    /// Refill for the time elapsed since the last call, then try to take `n` tokens.
    ///
    /// Returns `true` if the tokens were taken. A clock that moved backwards
    /// refills nothing.
    pub fn allow(&self, now: DateTime<Utc>, n: u32) -> bool {
        let mut state = self.state.lock();

        let elapsed_nanos = state
            .last_refreshed
            .and_then(|last| (now - last).to_std().ok())
            .map(|elapsed| elapsed.as_nanos() as f64)
            .unwrap_or(0.0);
        let refill = elapsed_nanos * self.params.rate() as f64 / NANOS_PER_SEC;

        state.tokens = (state.tokens + refill).min(self.params.capacity() as f64);
        state.last_refreshed = Some(now);

        let requested = n as f64;
        if state.tokens >= requested {
            state.tokens -= requested;
            true
        } else {
            false
        }
    }

    /// Tokens currently held, as of the last call.
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }
}
