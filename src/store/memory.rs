//! In-process shared store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{SharedStore, Transaction};
use crate::error::TransactionError;
use crate::ratelimit::{refill_and_consume, BucketKeys};

/// Expired entries are purged at most this often, by the next transaction.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A store that keeps every entry in process memory.
///
/// Each transaction runs under a single lock, so it is as atomic as a
/// server-side script. Entries expire like store keys with a TTL and are
/// purged from memory by a periodic sweep. The store
/// can be switched to unavailable to simulate an outage; while unavailable
/// every call fails and no entry is touched.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: Mutex<EntryTable>,
    available: AtomicBool,
    evaluations: AtomicU64,
    pings: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug)]
struct EntryTable {
    entries: HashMap<String, Entry>,
    next_sweep: Instant,
}

impl EntryTable {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_sweep: Instant::now() + SWEEP_INTERVAL,
        }
    }

    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|entry| entry.is_live(now))
    }

    fn value(&self, key: &str, now: Instant) -> Option<i64> {
        self.live(key, now).map(|entry| entry.value)
    }

    /// Drop every expired entry if the sweep is due.
    fn sweep(&mut self, now: Instant) {
        if now < self.next_sweep {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.next_sweep = now + SWEEP_INTERVAL;
        trace!(removed = before - self.entries.len(), "Expired entries swept");
    }
}

impl InMemoryStore {
    /// Create an empty, available store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(EntryTable::new()),
            available: AtomicBool::new(true),
            evaluations: AtomicU64::new(0),
            pings: AtomicU64::new(0),
        }
    }

    /// Simulate the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether the store currently answers.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of transactions attempted, including failed ones.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Number of liveness probes attempted, including failed ones.
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Stored token count of a bucket, if present and not expired.
    pub fn tokens(&self, keys: &BucketKeys) -> Option<i64> {
        self.get(&keys.tokens)
    }

    /// Stored last-refresh timestamp of a bucket, if present and not expired.
    pub fn last_refreshed(&self, keys: &BucketKeys) -> Option<i64> {
        self.get(&keys.timestamp)
    }

    /// Read any live entry.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.entries.lock().value(key, Instant::now())
    }

    /// Number of entries held in memory, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time left before an entry expires.
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let table = self.entries.lock();
        table
            .live(key, now)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn ensure_available(&self) -> Result<(), TransactionError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(TransactionError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn evaluate(&self, transaction: &Transaction) -> Result<i64, TransactionError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let now = Instant::now();
        let mut table = self.entries.lock();
        table.sweep(now);

        match transaction {
            Transaction::TokenBucket {
                keys,
                params,
                now: clock,
                requested,
            } => {
                let consumed = refill_and_consume(
                    *params,
                    table.value(&keys.tokens, now),
                    table.value(&keys.timestamp, now),
                    *clock,
                    *requested,
                );

                let expires_at = Some(now + Duration::from_secs(params.ttl_secs().max(1)));
                table.entries.insert(
                    keys.tokens.clone(),
                    Entry {
                        value: consumed.tokens,
                        expires_at,
                    },
                );
                table.entries.insert(
                    keys.timestamp.clone(),
                    Entry {
                        value: *clock,
                        expires_at,
                    },
                );

                Ok(consumed.allowed as i64)
            }
            Transaction::PeriodWindow {
                key,
                quota,
                period_ms,
            } => {
                let current = table.value(key, now).unwrap_or(0) + 1;
                let expires_at = if current == 1 {
                    Some(now + Duration::from_millis(*period_ms))
                } else {
                    table.live(key, now).and_then(|entry| entry.expires_at)
                };
                table.entries.insert(
                    key.clone(),
                    Entry {
                        value: current,
                        expires_at,
                    },
                );
                trace!(key = %key, current, quota, "Period window incremented");

                let quota = *quota as i64;
                Ok(if current == 1 || current < quota {
                    1
                } else if current == quota {
                    2
                } else {
                    3
                })
            }
        }
    }

    async fn ping(&self) -> Result<(), TransactionError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::BucketParams;

    fn bucket_transaction(keys: &BucketKeys, now: i64) -> Transaction {
        Transaction::TokenBucket {
            keys: keys.clone(),
            params: BucketParams::new(5, 10).unwrap(),
            now,
            requested: 1,
        }
    }

    #[tokio::test]
    async fn test_token_bucket_sets_ttl_on_both_keys() {
        let store = InMemoryStore::new();
        let keys = BucketKeys::new("ttl");

        assert_eq!(store.evaluate(&bucket_transaction(&keys, 50)).await.unwrap(), 1);

        let ttl = store.time_to_live(&keys.tokens).unwrap();
        assert!(ttl <= Duration::from_secs(4) && ttl > Duration::from_secs(3));
        assert!(store.time_to_live(&keys.timestamp).is_some());
    }

    #[tokio::test]
    async fn test_ttl_is_at_least_one_second() {
        let store = InMemoryStore::new();
        let keys = BucketKeys::new("short");
        let transaction = Transaction::TokenBucket {
            keys: keys.clone(),
            params: BucketParams::new(10, 1).unwrap(),
            now: 1,
            requested: 1,
        };

        store.evaluate(&transaction).await.unwrap();
        assert!(store.time_to_live(&keys.tokens).unwrap() > Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_expired_period_window_restarts() {
        let store = InMemoryStore::new();
        let transaction = Transaction::PeriodWindow {
            key: "window".to_string(),
            quota: 2,
            period_ms: 30,
        };

        assert_eq!(store.evaluate(&transaction).await.unwrap(), 1);
        assert_eq!(store.evaluate(&transaction).await.unwrap(), 2);
        assert_eq!(store.evaluate(&transaction).await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("window"), None);
        assert_eq!(store.evaluate(&transaction).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged() {
        let store = InMemoryStore::new();
        let params = BucketParams::new(10, 1).unwrap();

        for i in 0..500 {
            let transaction = Transaction::TokenBucket {
                keys: BucketKeys::new(&format!("idle-{}", i)),
                params,
                now: 1,
                requested: 1,
            };
            store.evaluate(&transaction).await.unwrap();
        }
        assert_eq!(store.len(), 1000);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.tokens(&BucketKeys::new("idle-0")), None);

        store
            .evaluate(&bucket_transaction(&BucketKeys::new("fresh"), 2))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_live_entries_survive_sweep() {
        let store = InMemoryStore::new();
        let keys = BucketKeys::new("busy");

        store.evaluate(&bucket_transaction(&keys, 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        store.evaluate(&bucket_transaction(&BucketKeys::new("other"), 2)).await.unwrap();

        assert_eq!(store.tokens(&keys), Some(9));
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_and_counts() {
        let store = InMemoryStore::new();
        store.set_available(false);

        assert!(store.ping().await.is_err());
        assert!(store
            .evaluate(&bucket_transaction(&BucketKeys::new("x"), 1))
            .await
            .is_err());
        assert_eq!(store.pings(), 1);
        assert_eq!(store.evaluations(), 1);
        assert_eq!(store.get("{x}.tokens"), None);

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
