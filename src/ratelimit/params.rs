//! Token bucket parameters.

use crate::error::{Result, TokenHiveError};

/// Immutable parameters of one token bucket.
///
/// Every limiter owns its own copy; there is no process-wide default that
/// construction mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    rate: u32,
    capacity: u32,
}

impl BucketParams {
    /// Validate and build bucket parameters.
    ///
    /// `rate` is tokens added per second and `capacity` the most tokens the
    /// bucket can hold. Both must be positive.
    pub fn new(rate: u32, capacity: u32) -> Result<Self> {
        if rate == 0 {
            return Err(TokenHiveError::Config("rate must be greater than zero".to_string()));
        }
        if capacity == 0 {
            return Err(TokenHiveError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if capacity < rate {
            tracing::debug!(rate, capacity, "Bucket capacity is below its refill rate");
        }
        Ok(Self { rate, capacity })
    }

    /// Tokens added per second.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Maximum tokens held.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Expiry of the remote state: `floor(2 * capacity / rate)` seconds.
    pub fn ttl_secs(&self) -> u64 {
        (2 * self.capacity as u64) / self.rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_reject_zero_rate() {
        assert!(matches!(
            BucketParams::new(0, 10),
            Err(TokenHiveError::Config(_))
        ));
    }

    #[test]
    fn test_params_reject_zero_capacity() {
        assert!(matches!(
            BucketParams::new(5, 0),
            Err(TokenHiveError::Config(_))
        ));
    }

    #[test]
    fn test_params_ttl_is_twice_fill_time() {
        // 10 tokens at 5/s refill in 2 s
        let params = BucketParams::new(5, 10).unwrap();
        assert_eq!(params.ttl_secs(), 4);

        // floor(2 * 4 / 3) = 2
        let params = BucketParams::new(3, 4).unwrap();
        assert_eq!(params.ttl_secs(), 2);
    }
}
