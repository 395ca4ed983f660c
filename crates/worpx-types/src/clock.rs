//! Time source abstraction.
//!
//! Every deadline in the ledger (channel dispute windows, escrow expiry,
//! mempool max age, dispute deadlines, settlement intervals) is computed
//! from an injected [`Clock`] so it can be driven deterministically.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Convenience constructor for the production clock.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A manually advanced clock for tests.
/// **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            millis: std::sync::atomic::AtomicI64::new(start.timestamp_millis()),
        })
    }

    /// Start the clock at the UNIX epoch (t = 0).
    #[must_use]
    pub fn at_epoch() -> Arc<Self> {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), std::sync::atomic::Ordering::SeqCst);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        self.millis
            .store(to.timestamp_millis(), std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.millis.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        assert_eq!(clock.now().timestamp(), 0);
        clock.advance(chrono::Duration::hours(24));
        assert_eq!(clock.now().timestamp(), 86_400);
    }

    #[test]
    fn manual_clock_as_shared() {
        let clock = ManualClock::at_epoch();
        let shared: SharedClock = clock.clone();
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(shared.now().timestamp(), 5);
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = system_clock();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
