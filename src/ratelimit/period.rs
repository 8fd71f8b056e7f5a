//! Fixed-window counter shared through the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TokenHiveError, TransactionError};
use crate::store::{SharedStore, Transaction};

/// Result of counting one event in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodOutcome {
    /// Below quota
    Allowed,
    /// This event used the last unit of quota
    HitQuota,
    /// Quota already used up for this window
    OverQuota,
}

impl PeriodOutcome {
    /// Whether the event should go ahead.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, PeriodOutcome::OverQuota)
    }

    fn from_reply(reply: i64) -> std::result::Result<Self, TransactionError> {
        match reply {
            1 => Ok(PeriodOutcome::Allowed),
            2 => Ok(PeriodOutcome::HitQuota),
            3 => Ok(PeriodOutcome::OverQuota),
            other => Err(TransactionError::UnexpectedReply(format!(
                "period window transaction returned {}",
                other
            ))),
        }
    }
}

/// Counts events per key in fixed windows of `period`, allowing `quota`
/// of them per window across every process sharing the store.
///
/// The window starts with the first event and its counter expires with it.
/// Unlike [`TokenLimiter`](super::TokenLimiter) there is no local fallback:
/// store failures are returned to the caller.
pub struct PeriodLimiter<S: SharedStore + ?Sized> {
    key: String,
    quota: u32,
    period: Duration,
    store: Arc<S>,
}

impl<S: SharedStore + ?Sized> PeriodLimiter<S> {
    /// Create a period limiter. `quota` must be positive and `period` at
    /// least one millisecond.
    pub fn new(key: impl Into<String>, quota: u32, period: Duration, store: Arc<S>) -> Result<Self> {
        if quota == 0 {
            return Err(TokenHiveError::Config("quota must be greater than zero".to_string()));
        }
        if period.as_millis() == 0 {
            return Err(TokenHiveError::Config(
                "period must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self {
            key: key.into(),
            quota,
            period,
            store,
        })
    }

    /// Count one event.
    pub async fn take(&self) -> std::result::Result<PeriodOutcome, TransactionError> {
        let transaction = Transaction::PeriodWindow {
            key: self.key.clone(),
            quota: self.quota,
            period_ms: self.period.as_millis() as u64,
        };

        let outcome = PeriodOutcome::from_reply(self.store.evaluate(&transaction).await?)?;
        match outcome {
            PeriodOutcome::OverQuota => debug!(key = %self.key, quota = self.quota, "Period quota exceeded"),
            _ => trace!(key = %self.key, outcome = ?outcome, "Period event counted"),
        }
        Ok(outcome)
    }
}
