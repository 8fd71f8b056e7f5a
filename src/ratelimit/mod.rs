//! Rate limiting algorithms, the failover state machine, and the
//! limiter façade.

mod backend;
mod bucket;
mod health;
mod keys;
mod limiter;
mod monitor;
mod params;
mod period;
mod remote;

pub use backend::RateLimiterBackend;
pub use bucket::LocalBucket;
pub use health::HealthState;
pub use keys::BucketKeys;
pub use limiter::{TokenLimiter, DEFAULT_PROBE_INTERVAL};
pub use params::BucketParams;
pub use period::{PeriodLimiter, PeriodOutcome};
pub use remote::{refill_and_consume, try_consume, Consumed};
