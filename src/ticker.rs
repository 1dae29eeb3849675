//! Work done by the periodic timer interrupt on every tick.

use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::CriticalSection;

use crate::clock::{SharedTickClock, TICKS_PER_DAY, TICKS_PER_SECOND};

pub const HEADINGS_PER_SECOND: i32 = 25;
pub const TICKS_PER_HEADING: u16 = (TICKS_PER_SECOND / HEADINGS_PER_SECOND) as u16;

/// Raised from the timer interrupt when the next heading sentence is due,
/// taken by the main loop when it sends one.
#[derive(Debug, Default)]
pub struct HeadingCadence(AtomicBool);

impl HeadingCadence {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PulseLevel {
    High,
    Low,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PulseSettings {
    /// High time at the start of each second, in ticks.
    pub length: i16,
    /// Shift of the pulse against the second boundary, in ticks.
    pub offset: i16,
}

impl PulseSettings {
    /// Pulse level at a given tick of the day.
    pub fn level_at(&self, ticks: i32) -> PulseLevel {
        let phase = (ticks + TICKS_PER_DAY + i32::from(self.offset)).rem_euclid(TICKS_PER_SECOND);
        if phase < i32::from(self.length) {
            PulseLevel::High
        } else {
            PulseLevel::Low
        }
    }
}

#[derive(Debug, Default)]
pub struct Ticker {
    heading_ticks: u16,
}

impl Ticker {
    pub const fn new() -> Self {
        Self { heading_ticks: 0 }
    }

    /// Advances the clock by one tick and raises the heading cadence when due.
    /// Returns the pulse level to drive, or `None` while the clock has not been
    /// set from GPS.
    pub fn on_tick(
        &mut self,
        cs: CriticalSection<'_>,
        clock: &SharedTickClock,
        cadence: &HeadingCadence,
        pulse: PulseSettings,
    ) -> Option<PulseLevel> {
        let ticks = clock.advance_in(cs);
        let level = clock.is_valid_in(cs).then(|| pulse.level_at(ticks));

        self.heading_ticks += 1;
        if self.heading_ticks > TICKS_PER_HEADING {
            self.heading_ticks = 0;
            cadence.raise();
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PULSE: PulseSettings = PulseSettings {
        length: 100,
        offset: 0,
    };

    #[test_log::test]
    fn pulse_is_idle_until_clock_is_set() {
        let clock = SharedTickClock::new();
        let cadence = HeadingCadence::new();
        let mut ticker = Ticker::new();

        let level = critical_section::with(|cs| ticker.on_tick(cs, &clock, &cadence, PULSE));
        assert_eq!(level, None);
        assert_eq!(clock.read(), 1);

        clock.set(5 * TICKS_PER_SECOND - 1);
        let level = critical_section::with(|cs| ticker.on_tick(cs, &clock, &cadence, PULSE));
        assert_eq!(level, Some(PulseLevel::High));
        assert_eq!(clock.read(), 5 * TICKS_PER_SECOND);
    }

    #[test_log::test]
    fn pulse_window() {
        assert_eq!(PULSE.level_at(0), PulseLevel::High);
        assert_eq!(PULSE.level_at(99), PulseLevel::High);
        assert_eq!(PULSE.level_at(100), PulseLevel::Low);
        assert_eq!(PULSE.level_at(TICKS_PER_DAY - 1), PulseLevel::Low);

        let early = PulseSettings {
            length: 100,
            offset: 50,
        };
        assert_eq!(early.level_at(TICKS_PER_SECOND - 50), PulseLevel::High);
        assert_eq!(early.level_at(49), PulseLevel::High);
        assert_eq!(early.level_at(50), PulseLevel::Low);

        let late = PulseSettings {
            length: 100,
            offset: -1000,
        };
        assert_eq!(late.level_at(0), PulseLevel::High);
    }

    #[test_log::test]
    fn heading_cadence_every_41_ticks() {
        let clock = SharedTickClock::new();
        let cadence = HeadingCadence::new();
        let mut ticker = Ticker::new();

        let mut raised_at = Vec::new();
        for tick in 1..=200 {
            critical_section::with(|cs| ticker.on_tick(cs, &clock, &cadence, PULSE));
            if cadence.take() {
                raised_at.push(tick);
            }
        }
        assert_eq!(raised_at, [41, 82, 123, 164]);
        assert!(!cadence.is_raised());
    }
}
