//! Distributed token bucket limiter with local failover.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::bucket::LocalBucket;
use super::health::{Health, HealthState};
use super::keys::BucketKeys;
use super::monitor::spawn_monitor;
use super::params::BucketParams;
use super::remote;
use crate::config::LimiterConfig;
use crate::error::{Result, TransactionError};
use crate::store::SharedStore;

/// Default interval between store probes while degraded.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// A token bucket whose authoritative state lives in a shared store.
///
/// While the store answers, every admission is one atomic transaction
/// against it, so all processes sharing the key draw from one quota. The
/// first failed transaction switches the limiter to a process-local bucket
/// and starts a monitor; the limiter stays local until the monitor sees the
/// store answer again. Callers only ever get an admission decision.
///
/// This struct is thread-safe and can be shared across multiple tasks.
/// Admissions must be awaited inside a tokio runtime, because failing over
/// spawns the monitor as a tokio task.
pub struct TokenLimiter<S: SharedStore + ?Sized + 'static> {
    /// Caller-chosen identity of the quota
    key: String,
    /// Store entries backing the quota
    keys: BucketKeys,
    params: BucketParams,
    probe_interval: Duration,
    store: Arc<S>,
    /// Serves admissions while degraded
    local: LocalBucket,
    health: Arc<Health>,
}

impl<S: SharedStore + ?Sized + 'static> std::fmt::Debug for TokenLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLimiter")
            .field("key", &self.key)
            .field("params", &self.params)
            .field("probe_interval", &self.probe_interval)
            .field("health", &self.health.state())
            .finish()
    }
}

impl<S: SharedStore + ?Sized + 'static> TokenLimiter<S> {
    /// Create a limiter for `key` backed by `store`.
    pub fn new(key: impl Into<String>, params: BucketParams, store: Arc<S>) -> Self {
        let key = key.into();
        Self {
            keys: BucketKeys::new(&key),
            key,
            params,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            store,
            local: LocalBucket::new(params),
            health: Arc::new(Health::new()),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(key: impl Into<String>, config: &LimiterConfig, store: Arc<S>) -> Result<Self> {
        let params = config.bucket_params()?;
        let probe_interval = config.probe_interval()?;
        Ok(Self::new(key, params, store).with_probe_interval(probe_interval))
    }

    /// Set how often the store is probed while degraded.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Decide whether `n` events may happen at `now`.
    ///
    /// The store sees `now` in whole seconds; the local bucket uses it at
    /// full precision.
    ///
    /// # Panics
    ///
    /// Panics if the first failed transaction of an outage happens outside
    /// a tokio runtime, since the health monitor cannot be spawned there.
    pub async fn allow(&self, now: DateTime<Utc>, n: u32) -> bool {
        if self.health.state() == HealthState::Degraded {
            return self.allow_local(now, n);
        }

        match remote::try_consume(&*self.store, &self.keys, self.params, now.timestamp(), n).await {
            Ok(allowed) => {
                if allowed {
                    trace!(key = %self.key, n, "Admitted by shared store");
                } else {
                    debug!(key = %self.key, n, "Rejected by shared store");
                }
                allowed
            }
            Err(e) => {
                self.fail_over(&e);
                self.allow_local(now, n)
            }
        }
    }

    /// Decide whether one event may happen now.
    ///
    /// # Panics
    ///
    /// Same as [`allow`](Self::allow).
    pub async fn allow_now(&self) -> bool {
        self.allow(Utc::now(), 1).await
    }

    fn allow_local(&self, now: DateTime<Utc>, n: u32) -> bool {
        let allowed = self.local.allow(now, n);
        trace!(key = %self.key, n, allowed, "Local bucket decision");
        allowed
    }

    /// Enter degraded mode. Of concurrent failing callers only the one that
    /// flips the state starts a monitor.
    fn fail_over(&self, error: &TransactionError) {
        if !self.health.degrade() {
            return;
        }

        warn!(
            key = %self.key,
            error = %error,
            "Shared store transaction failed, falling back to local bucket"
        );

        if self.health.claim_monitor() {
            spawn_monitor(
                self.key.clone(),
                self.store.clone(),
                Arc::downgrade(&self.health),
                self.probe_interval,
            );
        }
    }

    /// Current health state.
    pub fn health(&self) -> HealthState {
        self.health.state()
    }

    /// Whether a health monitor is running.
    pub fn monitor_active(&self) -> bool {
        self.health.monitor_active()
    }

    /// Number of health monitors started over the limiter's lifetime.
    pub fn monitor_launches(&self) -> u64 {
        self.health.monitor_launches()
    }

    /// The limiter key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store entries backing this limiter.
    pub fn store_keys(&self) -> &BucketKeys {
        &self.keys
    }

    /// Bucket parameters.
    pub fn params(&self) -> BucketParams {
        self.params
    }

    /// Tokens held by the local fallback bucket.
    pub fn local_tokens(&self) -> f64 {
        self.local.tokens()
    }
}
