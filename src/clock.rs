//! The tick-of-day counter shared between the timer interrupt and the main loop.
//!
//! Every access goes through a [`critical_section`]. Callers that already hold
//! a [`CriticalSection`] token (the timer interrupt, or code nested inside
//! another critical section) use the `*_in` variants, so the token proves at
//! compile time that interrupts are already masked and nothing re-enables them
//! behind the caller's back. The plain variants open their own section, which
//! restores the previous interrupt state on exit rather than unconditionally
//! enabling interrupts.

use core::cell::Cell;

use chrono::NaiveTime;
use critical_section::{CriticalSection, Mutex};

/// Local ticks per second. The timer interrupt fires at this rate.
pub const TICKS_PER_SECOND: i32 = 1000;
/// Ticks in a day; the counter wraps here.
pub const TICKS_PER_DAY: i32 = 24 * 3600 * TICKS_PER_SECOND;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
struct Counter {
    ticks: i32,
    valid: bool,
}

/// Wrapping tick-of-day counter, valid once it has been set from GPS time.
pub struct SharedTickClock {
    counter: Mutex<Cell<Counter>>,
}

impl Default for SharedTickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTickClock {
    pub const fn new() -> Self {
        Self {
            counter: Mutex::new(Cell::new(Counter {
                ticks: 0,
                valid: false,
            })),
        }
    }

    /// Current tick of the day.
    pub fn read(&self) -> i32 {
        critical_section::with(|cs| self.read_in(cs))
    }

    pub fn read_in(&self, cs: CriticalSection<'_>) -> i32 {
        self.counter.borrow(cs).get().ticks
    }

    /// Replaces the counter with `ticks` folded into `[0, TICKS_PER_DAY)` and
    /// marks the clock valid.
    pub fn set(&self, ticks: i32) {
        critical_section::with(|cs| self.set_in(cs, ticks))
    }

    pub fn set_in(&self, cs: CriticalSection<'_>, ticks: i32) {
        let ticks = normalize(i64::from(ticks));
        self.counter.borrow(cs).set(Counter {
            ticks,
            valid: ticks >= 0,
        });
    }

    /// Shifts a valid clock by `delta` ticks. Does nothing on an invalid clock
    /// or a zero delta.
    pub fn add(&self, delta: i32) {
        critical_section::with(|cs| self.add_in(cs, delta))
    }

    pub fn add_in(&self, cs: CriticalSection<'_>, delta: i32) {
        let cell = self.counter.borrow(cs);
        let counter = cell.get();
        if !counter.valid || delta == 0 {
            return;
        }
        let ticks = normalize(i64::from(counter.ticks) + i64::from(delta));
        cell.set(Counter {
            ticks,
            valid: ticks >= 0,
        });
    }

    /// Advances the counter by one tick regardless of validity. Called from the
    /// timer interrupt; returns the new tick of the day.
    pub fn advance_in(&self, cs: CriticalSection<'_>) -> i32 {
        let cell = self.counter.borrow(cs);
        let mut counter = cell.get();
        counter.ticks += 1;
        if counter.ticks >= TICKS_PER_DAY {
            counter.ticks = 0;
        }
        cell.set(counter);
        counter.ticks
    }

    pub fn is_valid(&self) -> bool {
        critical_section::with(|cs| self.is_valid_in(cs))
    }

    pub fn is_valid_in(&self, cs: CriticalSection<'_>) -> bool {
        self.counter.borrow(cs).get().valid
    }
}

fn normalize(ticks: i64) -> i32 {
    // rem_euclid keeps the result in [0, TICKS_PER_DAY), which always fits i32
    ticks.rem_euclid(i64::from(TICKS_PER_DAY)) as i32
}

/// Converts a tick of the day into a wall-clock time.
pub fn naive_time_of_ticks(ticks: i32) -> Option<NaiveTime> {
    if !(0..TICKS_PER_DAY).contains(&ticks) {
        return None;
    }
    let seconds = (ticks / TICKS_PER_SECOND) as u32;
    let millis = ((ticks % TICKS_PER_SECOND) * 1000 / TICKS_PER_SECOND) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, millis * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test_log::test]
    fn starts_invalid_and_ignores_add() {
        let clock = SharedTickClock::new();
        assert!(!clock.is_valid());
        clock.add(500);
        assert_eq!(clock.read(), 0);
        assert!(!clock.is_valid());
    }

    #[test_log::test]
    fn set_normalizes_and_validates() {
        let clock = SharedTickClock::new();
        clock.set(TICKS_PER_DAY + 42);
        assert!(clock.is_valid());
        assert_eq!(clock.read(), 42);

        clock.set(-1);
        assert_eq!(clock.read(), TICKS_PER_DAY - 1);

        // more than one day negative still lands inside the day
        clock.set(-TICKS_PER_DAY - 10);
        assert_eq!(clock.read(), TICKS_PER_DAY - 10);
        assert!(clock.is_valid());
    }

    #[test_log::test]
    fn add_wraps_both_ways() {
        let clock = SharedTickClock::new();
        clock.set(TICKS_PER_DAY - 5);
        clock.add(10);
        assert_eq!(clock.read(), 5);
        clock.add(-20);
        assert_eq!(clock.read(), TICKS_PER_DAY - 15);
        clock.add(0);
        assert_eq!(clock.read(), TICKS_PER_DAY - 15);
    }

    #[test_log::test]
    fn advance_runs_even_when_invalid() {
        let clock = SharedTickClock::new();
        let ticks = critical_section::with(|cs| {
            clock.advance_in(cs);
            clock.advance_in(cs)
        });
        assert_eq!(ticks, 2);
        assert!(!clock.is_valid());

        clock.set(TICKS_PER_DAY - 1);
        assert_eq!(critical_section::with(|cs| clock.advance_in(cs)), 0);
    }

    #[test_log::test]
    fn nested_access_reuses_outer_section() {
        let clock = SharedTickClock::new();
        clock.set(1000);
        critical_section::with(|cs| {
            // plain calls nest inside an already held section
            assert_eq!(clock.read(), 1000);
            clock.add_in(cs, 1);
            assert_eq!(clock.read_in(cs), 1001);
            assert!(clock.is_valid());
        });
        assert_eq!(clock.read(), 1001);
    }

    #[test_log::test]
    fn wall_clock_of_ticks() {
        let t = naive_time_of_ticks(((12 * 60 + 34) * 60 + 56) * TICKS_PER_SECOND + 789).unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (12, 34, 56));
        assert_eq!(t.nanosecond(), 789_000_000);
        assert_eq!(naive_time_of_ticks(TICKS_PER_DAY), None);
        assert_eq!(naive_time_of_ticks(-1), None);
    }
}
