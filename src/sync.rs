//! Disciplines the shared tick clock to GPS time.
//!
//! The first GPS time sets the clock outright. After that every sentence
//! yields a raw offset between GPS time and the local tick captured when the
//! sentence started; the mean of the last two raw offsets is applied, clamped
//! to `offset_limit` while it looks like ordinary drift (inside `jump_limit`)
//! and unclamped when it looks like a jump.

use crate::clock::SharedTickClock;
use crate::logging::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncLimits {
    /// Smoothed offsets at or beyond this magnitude are applied unclamped.
    pub jump_limit: i32,
    /// Bound on the correction applied for ordinary drift.
    pub offset_limit: i32,
}

/// What a GPS time did to the clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Correction {
    /// The clock was invalid and has been set. `elapsed` is the number of local
    /// ticks spent between the start of the sentence and the set.
    FirstFix { ticks: i32, elapsed: i32 },
    /// The clock was shifted by this many ticks (possibly zero).
    Offset(i32),
}

#[derive(Debug, Default)]
pub struct SyncLoop {
    /// Local tick at the `$` of the sentence being parsed
    start_ticks: i32,
    previous_raw_offset: i32,
}

impl SyncLoop {
    pub const fn new() -> Self {
        Self {
            start_ticks: 0,
            previous_raw_offset: 0,
        }
    }

    /// Remembers the local time at which a sentence started. Call on every `$`
    /// from the GPS, before the byte is parsed.
    pub fn mark_sentence_start(&mut self, clock: &SharedTickClock) {
        self.start_ticks = clock.read();
    }

    pub fn start_ticks(&self) -> i32 {
        self.start_ticks
    }

    pub fn previous_raw_offset(&self) -> i32 {
        self.previous_raw_offset
    }

    /// Reconciles the clock with a GPS time of day, `gps_ticks` being the tick
    /// of the day the sentence that started at `start_ticks` refers to.
    pub fn apply(
        &mut self,
        clock: &SharedTickClock,
        gps_ticks: i32,
        limits: SyncLimits,
    ) -> Correction {
        if !clock.is_valid() {
            let elapsed = clock.read() - self.start_ticks;
            clock.set(gps_ticks + elapsed);
            info!("sync: first fix at tick {}, {} ticks after start", gps_ticks, elapsed);
            return Correction::FirstFix {
                ticks: gps_ticks,
                elapsed,
            };
        }

        let raw_offset = gps_ticks - self.start_ticks;
        let smoothed = (self.previous_raw_offset + raw_offset) / 2;
        self.previous_raw_offset = raw_offset;

        let offset = limit(smoothed, limits);
        if offset != 0 {
            clock.add(offset);
        }
        debug!("sync: raw offset {}, applied {}", raw_offset, offset);
        Correction::Offset(offset)
    }
}

/// Clamps ordinary drift to `offset_limit`; anything at or past `jump_limit`
/// passes through so a reacquired clock converges quickly.
fn limit(offset: i32, limits: SyncLimits) -> i32 {
    let SyncLimits {
        jump_limit,
        offset_limit,
    } = limits;
    if offset < jump_limit && -offset < jump_limit {
        // not `clamp`: a negative offset_limit is accepted by the console
        if offset > offset_limit {
            offset_limit
        } else if offset < -offset_limit {
            -offset_limit
        } else {
            offset
        }
    } else {
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TICKS_PER_DAY;

    const LIMITS: SyncLimits = SyncLimits {
        jump_limit: 2000,
        offset_limit: 10,
    };

    fn synced_clock(ticks: i32) -> SharedTickClock {
        let clock = SharedTickClock::new();
        clock.set(ticks);
        clock
    }

    #[test_log::test]
    fn first_fix_sets_clock_with_elapsed() {
        let clock = SharedTickClock::new();
        critical_section::with(|cs| {
            for _ in 0..100 {
                clock.advance_in(cs);
            }
        });
        let mut sync = SyncLoop::new();
        sync.mark_sentence_start(&clock);
        // parsing takes 7 ticks
        critical_section::with(|cs| {
            for _ in 0..7 {
                clock.advance_in(cs);
            }
        });

        let correction = sync.apply(&clock, 43_200_000, LIMITS);
        assert_eq!(
            correction,
            Correction::FirstFix {
                ticks: 43_200_000,
                elapsed: 7
            }
        );
        assert!(clock.is_valid());
        assert_eq!(clock.read(), 43_200_007);
        // the first fix does not feed the smoother
        assert_eq!(sync.previous_raw_offset(), 0);
    }

    #[test_log::test]
    fn ordinary_drift_is_halved() {
        let clock = synced_clock(1_000_000);
        let mut sync = SyncLoop::new();
        sync.mark_sentence_start(&clock);

        let correction = sync.apply(&clock, 1_000_005, LIMITS);
        assert_eq!(correction, Correction::Offset(2));
        assert_eq!(clock.read(), 1_000_002);
        assert_eq!(sync.previous_raw_offset(), 5);
    }

    #[test_log::test]
    fn large_jump_is_applied_unclamped() {
        let clock = synced_clock(1_000_000);
        let mut sync = SyncLoop::new();
        sync.mark_sentence_start(&clock);

        let correction = sync.apply(&clock, 1_005_000, LIMITS);
        assert_eq!(correction, Correction::Offset(2500));
        assert_eq!(clock.read(), 1_002_500);
    }

    #[test_log::test]
    fn drift_is_clamped_to_offset_limit() {
        let clock = synced_clock(500);
        let mut sync = SyncLoop::new();
        sync.mark_sentence_start(&clock);
        assert_eq!(sync.apply(&clock, 500 + 300, LIMITS), Correction::Offset(10));

        sync.mark_sentence_start(&clock);
        // (300 + -1000) / 2 = -350
        let start = sync.start_ticks();
        assert_eq!(sync.apply(&clock, start - 1000, LIMITS), Correction::Offset(-10));
    }

    #[test_log::test]
    fn smoothing_uses_previous_raw_offset() {
        let clock = synced_clock(10_000);
        let mut sync = SyncLoop::new();

        sync.mark_sentence_start(&clock);
        assert_eq!(sync.apply(&clock, 10_000 + 7, LIMITS), Correction::Offset(3));

        // remembered raw 7, not the applied 3: (7 + 6) / 2 = 6
        sync.mark_sentence_start(&clock);
        let start = sync.start_ticks();
        assert_eq!(sync.apply(&clock, start + 6, LIMITS), Correction::Offset(6));

        // truncating toward zero: (6 + -9) / 2 = -1
        sync.mark_sentence_start(&clock);
        let start = sync.start_ticks();
        assert_eq!(sync.apply(&clock, start - 9, LIMITS), Correction::Offset(-1));
    }

    #[test_log::test]
    fn zero_offset_leaves_clock_alone() {
        let clock = synced_clock(TICKS_PER_DAY - 1);
        let mut sync = SyncLoop::new();
        sync.mark_sentence_start(&clock);
        assert_eq!(
            sync.apply(&clock, TICKS_PER_DAY - 1, LIMITS),
            Correction::Offset(0)
        );
        assert_eq!(clock.read(), TICKS_PER_DAY - 1);
    }

    #[test_log::test]
    fn limit_edges() {
        assert_eq!(limit(1999, LIMITS), 10);
        assert_eq!(limit(2000, LIMITS), 2000);
        assert_eq!(limit(-1999, LIMITS), -10);
        assert_eq!(limit(-2000, LIMITS), -2000);
        assert_eq!(limit(-3, LIMITS), -3);

        let negative = SyncLimits {
            jump_limit: 2000,
            offset_limit: -5,
        };
        assert_eq!(limit(100, negative), -5);
        assert_eq!(limit(3, negative), -5);
    }
}
