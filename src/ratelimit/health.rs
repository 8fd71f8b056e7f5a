//! Store health state shared by a limiter and its monitor.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use parking_lot::Mutex;

/// Whether the limiter currently trusts the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    /// Admission goes through the shared store
    Healthy,
    /// Admission is served by the local bucket
    Degraded,
}

impl HealthState {
    fn from_u8(value: u8) -> Self {
        match value {
            HEALTHY => HealthState::Healthy,
            _ => HealthState::Degraded,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            HealthState::Healthy => HEALTHY,
            HealthState::Degraded => DEGRADED,
        }
    }
}

const HEALTHY: u8 = 0;
const DEGRADED: u8 = 1;

/// Health state machine of one limiter.
///
/// State transitions are compare-and-set so that, of many callers seeing
/// the same failure, exactly one performs the `Healthy -> Degraded` flip.
/// The monitor-active flag sits behind its own lock, off the admission
/// path, which only ever loads the state.
#[derive(Debug)]
pub(crate) struct Health {
    state: AtomicU8,
    monitor_active: Mutex<bool>,
    monitor_launches: AtomicU64,
}

impl Health {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(HEALTHY),
            monitor_active: Mutex::new(false),
            monitor_launches: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> HealthState {
        HealthState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    fn transition(&self, from: HealthState, to: HealthState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flip to `Degraded`. Returns `true` only for the caller that flipped it.
    pub(crate) fn degrade(&self) -> bool {
        self.transition(HealthState::Healthy, HealthState::Degraded)
    }

    /// Claim the right to run the monitor. Returns `false` if one is running.
    pub(crate) fn claim_monitor(&self) -> bool {
        let mut active = self.monitor_active.lock();
        if *active {
            return false;
        }
        *active = true;
        self.monitor_launches.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Called by the monitor once the store answers again.
    ///
    /// The monitor flag is released before the state flips back, so a
    /// failure right after recovery can always start a new monitor.
    pub(crate) fn recover(&self) {
        *self.monitor_active.lock() = false;
        self.transition(HealthState::Degraded, HealthState::Healthy);
    }

    pub(crate) fn monitor_active(&self) -> bool {
        *self.monitor_active.lock()
    }

    pub(crate) fn monitor_launches(&self) -> u64 {
        self.monitor_launches.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let health = Health::new();
        assert_eq!(health.state(), HealthState::Healthy);
        assert!(!health.monitor_active());
    }

    #[test]
    fn test_only_first_degrade_wins() {
        let health = Health::new();
        assert!(health.degrade());
        assert!(!health.degrade());
        assert_eq!(health.state(), HealthState::Degraded);
    }

    #[test]
    fn test_monitor_claim_is_exclusive() {
        let health = Health::new();
        assert!(health.claim_monitor());
        assert!(!health.claim_monitor());
        assert_eq!(health.monitor_launches(), 1);

        health.recover();
        assert!(health.claim_monitor());
        assert_eq!(health.monitor_launches(), 2);
    }

    #[test]
    fn test_recover_clears_both_flags() {
        let health = Health::new();
        health.degrade();
        health.claim_monitor();

        health.recover();
        assert_eq!(health.state(), HealthState::Healthy);
        assert!(!health.monitor_active());
        assert!(health.degrade());
    }

    #[test]
    fn test_concurrent_degrade_has_single_winner() {
        let health = std::sync::Arc::new(Health::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let health = health.clone();
                std::thread::spawn(move || health.degrade())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
