//! Monotonic fixed clock for replay.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// Clock that returns `base + k` milliseconds on its k-th call (0-based).
///
/// Monotonic and reproducible: two replays with the same base observe the
/// same timestamps in the same order.
#[derive(Debug)]
pub struct FixedClock {
    base: DateTime<Utc>,
    ticks: AtomicU64,
}

impl FixedClock {
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            ticks: AtomicU64::new(0),
        }
    }

    /// Next timestamp; each call advances one millisecond.
    pub fn now(&self) -> DateTime<Utc> {
        let k = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.base + Duration::milliseconds(k as i64)
    }

    /// How many times the clock has been read.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_one_ms_per_call() {
        let base: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let clock = FixedClock::new(base);
        assert_eq!(clock.now(), base);
        assert_eq!(clock.now(), base + Duration::milliseconds(1));
        assert_eq!(clock.now(), base + Duration::milliseconds(2));
        assert_eq!(clock.calls(), 3);
    }
}
