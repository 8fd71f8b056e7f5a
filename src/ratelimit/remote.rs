//! Atomic refill-and-consume against the shared store.

use tracing::trace;

use crate::error::TransactionError;
use crate::store::{SharedStore, Transaction};

use super::keys::BucketKeys;
use super::params::BucketParams;

/// Outcome of one refill-and-consume step on stored bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    /// Whether the requested tokens were taken
    pub allowed: bool,
    /// Token count to persist
    pub tokens: i64,
}

/// The bucket transaction every store must reproduce.
///
/// Absent state means a full bucket last refreshed at time zero. Time
/// flowing backwards refills nothing, and taking exactly the tokens left is
/// admitted.
pub fn refill_and_consume(
    params: BucketParams,
    last_tokens: Option<i64>,
    last_refreshed: Option<i64>,
    now: i64,
    requested: u32,
) -> Consumed {
    let capacity = params.capacity() as i64;
    let last_tokens = last_tokens.unwrap_or(capacity);
    let last_refreshed = last_refreshed.unwrap_or(0);

    let delta = now.saturating_sub(last_refreshed).max(0);
    let filled = last_tokens
        .saturating_add(delta.saturating_mul(params.rate() as i64))
        .min(capacity);

    let requested = requested as i64;
    if filled >= requested {
        Consumed {
            allowed: true,
            tokens: filled - requested,
        }
    } else {
        Consumed {
            allowed: false,
            tokens: filled,
        }
    }
}

/// Run the token bucket transaction for `keys` on the store.
///
/// `now` is the caller's clock in whole seconds. Store failures come back
/// as [`TransactionError`], never as a rejection.
pub async fn try_consume<S>(
    store: &S,
    keys: &BucketKeys,
    params: BucketParams,
    now: i64,
    requested: u32,
) -> Result<bool, TransactionError>
where
    S: SharedStore + ?Sized,
{
    let transaction = Transaction::TokenBucket {
        keys: keys.clone(),
        params,
        now,
        requested,
    };

    let reply = store.evaluate(&transaction).await?;
    trace!(keys = %keys, now, requested, reply, "Token bucket transaction completed");

    match reply {
        1 => Ok(true),
        0 => Ok(false),
        other => Err(TransactionError::UnexpectedReply(format!(
            "token bucket transaction returned {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn params() -> BucketParams {
        BucketParams::new(5, 10).unwrap()
    }

    #[test]
    fn test_absent_state_is_full_bucket() {
        let consumed = refill_and_consume(params(), None, None, 1_700_000_000, 1);
        assert_eq!(
            consumed,
            Consumed {
                allowed: true,
                tokens: 9
            }
        );
    }

    #[test]
    fn test_refill_over_elapsed_seconds() {
        let consumed = refill_and_consume(params(), Some(0), Some(100), 101, 1);
        assert_eq!(
            consumed,
            Consumed {
                allowed: true,
                tokens: 4
            }
        );
    }

    #[test]
    fn test_rejection_keeps_filled_tokens() {
        let consumed = refill_and_consume(params(), Some(2), Some(100), 100, 3);
        assert_eq!(
            consumed,
            Consumed {
                allowed: false,
                tokens: 2
            }
        );
    }

    #[test]
    fn test_exact_tokens_are_admitted() {
        let consumed = refill_and_consume(params(), Some(3), Some(100), 100, 3);
        assert!(consumed.allowed);
        assert_eq!(consumed.tokens, 0);
    }

    #[test]
    fn test_backwards_clock_refills_nothing() {
        let consumed = refill_and_consume(params(), Some(0), Some(100), 90, 1);
        assert!(!consumed.allowed);
        assert_eq!(consumed.tokens, 0);
    }

    #[tokio::test]
    async fn test_try_consume_rejects_after_capacity() {
        let store = InMemoryStore::new();
        let keys = BucketKeys::new("remote");

        for _ in 0..10 {
            assert!(try_consume(&store, &keys, params(), 1_000, 1).await.unwrap());
        }
        assert!(!try_consume(&store, &keys, params(), 1_000, 1).await.unwrap());
        assert_eq!(store.tokens(&keys), Some(0));
        assert_eq!(store.last_refreshed(&keys), Some(1_000));
    }

    #[tokio::test]
    async fn test_try_consume_surfaces_store_failure() {
        let store = InMemoryStore::new();
        store.set_available(false);

        let result = try_consume(&store, &BucketKeys::new("down"), params(), 1_000, 1).await;
        assert!(matches!(result, Err(TransactionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_state_untouched() {
        let store = InMemoryStore::new();
        let keys = BucketKeys::new("untouched");

        try_consume(&store, &keys, params(), 1_000, 4).await.unwrap();
        store.set_available(false);
        assert!(try_consume(&store, &keys, params(), 1_001, 4).await.is_err());

        assert_eq!(store.tokens(&keys), Some(6));
        assert_eq!(store.last_refreshed(&keys), Some(1_000));
    }
}
