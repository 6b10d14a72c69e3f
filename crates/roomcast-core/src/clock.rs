//! Wall-clock abstraction.
//!
//! Join times and event timestamps are taken from a [`Clock`] so tests can pin
//! them. The production implementation lives in the server crate.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of wall-clock time.
///
/// # Invariants
///
/// - Implementations are cheap to call and never block
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same time, so a test can keep a handle while the
/// registry owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock frozen at `millis` since the Unix epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self { millis: Arc::new(AtomicI64::new(millis)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let step = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(step, Ordering::SeqCst);
    }

    /// Current time in milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        from_unix_millis(self.millis())
    }
}

/// Milliseconds since the Unix epoch. Times before the epoch are negative.
pub fn unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Inverse of [`unix_millis`].
pub fn from_unix_millis(millis: i64) -> SystemTime {
    let magnitude = Duration::from_millis(millis.unsigned_abs());
    if millis >= 0 { UNIX_EPOCH + magnitude } else { UNIX_EPOCH - magnitude }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_handles_both_sides_of_epoch() {
        assert_eq!(unix_millis(UNIX_EPOCH), 0);
        assert_eq!(unix_millis(UNIX_EPOCH + Duration::from_millis(1_500)), 1_500);
        assert_eq!(unix_millis(UNIX_EPOCH - Duration::from_millis(20)), -20);
    }

    #[test]
    fn from_unix_millis_inverts() {
        for millis in [-86_400_000, -1, 0, 1, 1_720_623_600_000] {
            assert_eq!(unix_millis(from_unix_millis(millis)), millis);
        }
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::at_millis(1_000);
        let handle = clock.clone();

        handle.advance(Duration::from_millis(250));

        assert_eq!(clock.millis(), 1_250);
        assert_eq!(unix_millis(clock.now()), 1_250);
    }
}
