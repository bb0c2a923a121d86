//! Time sources.
//!
//! The engine never reads the system clock directly; it asks a [`Clock`] so
//! tests can drive lag/lead decisions deterministically.

use std::sync::atomic::{AtomicI64, Ordering};

use contracts::{now_ticks, ticks_from_seconds, Ticks};

/// Source of the current wall-clock time in ticks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Ticks;
}

/// UTC system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Ticks {
        now_ticks()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Ticks) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Start at the current system time.
    pub fn starting_now() -> Self {
        Self::new(SystemClock.now())
    }

    pub fn set(&self, ticks: Ticks) {
        self.now.store(ticks, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: Ticks) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn advance_seconds(&self, seconds: f64) {
        self.advance(ticks_from_seconds(seconds));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Ticks {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TICKS_PER_SECOND;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now(), 150);
        clock.advance_seconds(1.0);
        assert_eq!(clock.now(), 150 + TICKS_PER_SECOND);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z in ticks since the Unix epoch
        assert!(SystemClock.now() > 1_577_836_800 * TICKS_PER_SECOND);
    }
}
