//! SimClock - Simulated Time
//!
//! TigerStyle: Deterministic, controllable time for simulation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use crate::clock::Clock;
use crate::constants::{DST_EPOCH_MS, DST_TIME_ADVANCE_MS_MAX};

/// A simulated clock shared between a test and the backend under test.
///
/// TigerStyle:
/// - Time only moves forward
/// - All time operations are explicit
/// - No reliance on system time
#[derive(Debug)]
pub struct SimClock {
    /// Current time in milliseconds since the Unix epoch
    current_ms: AtomicU64,
}

impl SimClock {
    /// Create a clock starting at [`DST_EPOCH_MS`].
    #[must_use]
    pub fn new() -> Self {
        Self::at_ms(DST_EPOCH_MS)
    }

    /// Create a clock starting at the given time.
    #[must_use]
    pub fn at_ms(start_ms: u64) -> Self {
        Self {
            current_ms: AtomicU64::new(start_ms),
        }
    }

    /// Get current time in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }

    /// Advance time by the given milliseconds.
    ///
    /// # Panics
    /// Panics if ms exceeds `DST_TIME_ADVANCE_MS_MAX`.
    ///
    /// # Returns
    /// The new current time.
    pub fn advance_ms(&self, ms: u64) -> u64 {
        // Preconditions
        assert!(
            ms <= DST_TIME_ADVANCE_MS_MAX,
            "advance_ms({ms}) exceeds max ({DST_TIME_ADVANCE_MS_MAX})"
        );

        let old_time = self.current_ms.fetch_add(ms, Ordering::SeqCst);
        let new_time = old_time.saturating_add(ms);

        // Postcondition
        assert!(new_time >= old_time, "time must not go backwards");

        new_time
    }

    /// Set time to absolute value.
    ///
    /// # Panics
    /// Panics if new time is less than current time.
    pub fn set_ms(&self, ms: u64) {
        let current = self.now_ms();
        assert!(
            ms >= current,
            "cannot set time backwards: {ms} < {current}"
        );
        self.current_ms.store(ms, Ordering::SeqCst);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        let ms = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_time() {
        let clock = SimClock::new();
        assert_eq!(clock.now_ms(), DST_EPOCH_MS);
        assert_eq!(clock.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_advance_ms() {
        let clock = SimClock::at_ms(0);

        let new_time = clock.advance_ms(1000);

        assert_eq!(new_time, 1000);
        assert_eq!(clock.now_ms(), 1000);
    }

    #[test]
    fn test_multiple_advances() {
        let clock = SimClock::at_ms(0);

        clock.advance_ms(100);
        clock.advance_ms(200);
        clock.advance_ms(300);

        assert_eq!(clock.now_ms(), 600);
    }

    #[test]
    #[should_panic(expected = "advance_ms")]
    fn test_advance_exceeds_max() {
        let clock = SimClock::new();
        clock.advance_ms(DST_TIME_ADVANCE_MS_MAX + 1);
    }

    #[test]
    #[should_panic(expected = "cannot set time backwards")]
    fn test_set_ms_backwards() {
        let clock = SimClock::at_ms(0);
        clock.advance_ms(1000);
        clock.set_ms(500);
    }

    #[test]
    fn test_now_tracks_advances() {
        let clock = SimClock::new();
        let before = clock.now();
        clock.advance_ms(1500);
        let after = clock.now();
        assert_eq!((after - before).num_milliseconds(), 1500);
    }
}
