//! Simulation and wall clock.
//!
//! Grounded on `backtest_v2::clock::SimClock` in the codebase this crate is
//! derived from: a monotonic nanosecond clock that is the single source of
//! truth for timestamps during a backtest, so replayed runs never touch
//! system time. Live mode uses [`Clock::Wall`], which reads real time.

use std::fmt;

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type Nanos = i64;

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A source of timestamps shared by every engine component.
///
/// `Wall` is used by the live feed/strategy/order-manager path; `Sim` is
/// driven exclusively by the backtest replay loop. Both implement the same
/// interface so downstream code never branches on which mode it's in.
#[derive(Debug, Clone)]
pub enum Clock {
    Wall,
    Sim(SimClock),
}

impl Clock {
    #[inline]
    pub fn now(&self) -> Nanos {
        match self {
            Clock::Wall => chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            Clock::Sim(c) => c.now(),
        }
    }

    /// Advance the virtual clock. No-op in wall-clock mode.
    pub fn advance_to(&mut self, new_time: Nanos) {
        if let Clock::Sim(c) = self {
            c.advance_to(new_time);
        }
    }
}

/// Monotonic simulation clock.
///
/// # Determinism contract
/// - `now()` returns the current simulation time, never system time.
/// - `advance_to()` only moves forward; it panics on backward movement so a
///   misordered replay loop fails loudly instead of producing silently
///   wrong timestamps.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    current: Nanos,
}

impl SimClock {
    #[inline]
    pub fn new(start_time: Nanos) -> Self {
        Self { current: start_time }
    }

    #[inline]
    pub fn from_unix_secs(secs: i64) -> Self {
        Self::new(secs * NANOS_PER_SEC)
    }

    #[inline]
    pub fn now(&self) -> Nanos {
        self.current
    }

    #[inline]
    pub fn now_millis(&self) -> i64 {
        self.current / NANOS_PER_MILLI
    }

    #[inline]
    pub fn advance_to(&mut self, new_time: Nanos) {
        debug_assert!(
            new_time >= self.current,
            "SimClock: cannot go backward from {} to {}",
            self.current,
            new_time
        );
        self.current = new_time.max(self.current);
    }

    #[inline]
    pub fn advance_by(&mut self, delta: Nanos) {
        debug_assert!(delta >= 0, "SimClock: delta must be non-negative");
        self.current += delta.max(0);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.current / NANOS_PER_SEC;
        let nanos = self.current % NANOS_PER_SEC;
        write!(f, "{secs}.{nanos:09}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_clock_monotonic() {
        let mut clock = SimClock::new(1_000_000_000);
        clock.advance_to(2_000_000_000);
        assert_eq!(clock.now(), 2_000_000_000);
        clock.advance_by(500_000_000);
        assert_eq!(clock.now(), 2_500_000_000);
    }

    #[test]
    #[should_panic(expected = "cannot go backward")]
    fn sim_clock_backward_panics_in_debug() {
        let mut clock = SimClock::new(1_000_000_000);
        clock.advance_to(500_000_000);
    }
}
