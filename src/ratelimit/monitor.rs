//! Background probe that brings a degraded limiter back to the store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::health::Health;
use crate::store::SharedStore;

/// Spawn the health monitor for one degradation episode.
///
/// The task pings the store every `interval` until one ping succeeds, then
/// marks the limiter healthy and exits. It also exits if the limiter it
/// watches has been dropped.
pub(crate) fn spawn_monitor<S>(
    key: String,
    store: Arc<S>,
    health: Weak<Health>,
    interval: Duration,
) -> JoinHandle<()>
where
    S: SharedStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        info!(
            key = %key,
            interval_ms = interval.as_millis() as u64,
            "Store health monitor started"
        );

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut probes: u64 = 0;

        loop {
            ticker.tick().await;

            let Some(health) = health.upgrade() else {
                debug!(key = %key, "Limiter dropped, stopping health monitor");
                return;
            };

            probes += 1;
            match store.ping().await {
                Ok(()) => {
                    health.recover();
                    info!(
                        key = %key,
                        probes,
                        "Shared store reachable again, resuming distributed admission"
                    );
                    return;
                }
                Err(e) => {
                    debug!(key = %key, probes, error = %e, "Store probe failed");
                }
            }
        }
    })
}
