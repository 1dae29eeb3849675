//! Course-over-ground smoothing and the synthesized heading sentence.
//!
//! Courses are smoothed on the unit circle so that 359° and 1° average to 0°
//! rather than 180°. The filter state is the cosine and sine of the smoothed
//! course in Q14 fixed point, updated with truncating integer arithmetic.

use core::f32::consts::PI;
use core::fmt::{self, Write};

use crate::config::SentenceId;
use crate::logging::trace;
use crate::nmea::checksum;
use crate::FmtBuf;

/// 1.0 in the filter's fixed point.
pub const FIXED_ONE: i32 = 1 << 14;

const RADIANS_PER_HUNDREDTH: f32 = 0.01 * PI / 180.0;
const HUNDREDTHS_PER_RADIAN: f32 = 100.0 * 180.0 / PI;

/// `$XXXXX,DDD,T*CC\r\n`
pub type HeadingSentence = FmtBuf<24>;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HeadingFilter {
    cos_x14: i16,
    sin_x14: i16,
}

impl HeadingFilter {
    pub const fn new() -> Self {
        Self {
            cos_x14: 0,
            sin_x14: 0,
        }
    }

    /// Smoothed `(cos, sin)` in Q14.
    pub fn state(&self) -> (i16, i16) {
        (self.cos_x14, self.sin_x14)
    }

    /// Folds in a course reading (hundredths of a degree) with weight
    /// `reaction_speed` percent and returns the smoothed course.
    pub fn update(&mut self, course: u16, reaction_speed: u8) -> u16 {
        let angle = RADIANS_PER_HUNDREDTH * f32::from(course);
        let cos_new = (FIXED_ONE as f32 * libm::cosf(angle)) as i32;
        let sin_new = (FIXED_ONE as f32 * libm::sinf(angle)) as i32;

        let speed = i32::from(reaction_speed.min(100));
        let keep = 100 - speed;
        self.cos_x14 = ((speed * cos_new + keep * i32::from(self.cos_x14)) / 100) as i16;
        self.sin_x14 = ((speed * sin_new + keep * i32::from(self.sin_x14)) / 100) as i16;

        let smoothed = self.course();
        trace!("heading: course {} smoothed {}", course, smoothed);
        smoothed
    }

    /// Smoothed course in hundredths of a degree, `0..36000`.
    pub fn course(&self) -> u16 {
        let angle = libm::atan2f(f32::from(self.sin_x14), f32::from(self.cos_x14));
        let course = (HUNDREDTHS_PER_RADIAN * angle) as i32;
        if course >= 0 {
            course as u16
        } else {
            (course + 36000) as u16
        }
    }
}

/// Builds `$<id>,<whole degrees>,T*<checksum>\r\n` for a course in hundredths
/// of a degree.
pub fn heading_sentence(id: &SentenceId, course: u16) -> Result<HeadingSentence, fmt::Error> {
    let mut sentence = HeadingSentence::new();
    write!(sentence, "${},{:03},T*", id, course / 100)?;
    let body = &sentence.as_bytes()[1..sentence.len() - 1];
    let sum = checksum(body);
    write!(sentence, "{:02X}\r\n", sum)?;
    Ok(sentence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circular_distance(a: u16, b: u16) -> u16 {
        let d = a.abs_diff(b);
        d.min(36000 - d)
    }

    #[test_log::test]
    fn integer_smoothing_truncates() {
        let mut filter = HeadingFilter::new();
        assert_eq!(filter.update(0, 10), 0);
        assert_eq!(filter.state(), (1638, 0));
        assert_eq!(filter.update(0, 10), 0);
        // (10 * 16384 + 90 * 1638) / 100
        assert_eq!(filter.state(), (3112, 0));
    }

    #[test_log::test]
    fn full_reaction_follows_input() {
        for course in [4550u16, 13333, 27000, 35950] {
            let mut filter = HeadingFilter::new();
            let smoothed = filter.update(course, 100);
            assert!(
                circular_distance(smoothed, course) <= 2,
                "course {} smoothed to {}",
                course,
                smoothed
            );
        }
    }

    #[test_log::test]
    fn smoothing_converges() {
        let mut filter = HeadingFilter::new();
        let mut smoothed = 0;
        for _ in 0..200 {
            smoothed = filter.update(9050, 10);
        }
        // truncation stalls a few Q14 units short of the target
        assert!(circular_distance(smoothed, 9050) <= 10, "got {}", smoothed);
    }

    #[test_log::test]
    fn smoothing_wraps_through_north() {
        let mut filter = HeadingFilter::new();
        filter.update(35900, 100);
        let smoothed = filter.update(100, 50);
        assert!(circular_distance(smoothed, 0) <= 2, "got {}", smoothed);
    }

    #[test_log::test]
    fn empty_state_reads_north() {
        assert_eq!(HeadingFilter::new().course(), 0);
    }

    #[test_log::test]
    fn sentence_format() {
        let id = SentenceId::new("HDHDT").unwrap();
        let sentence = heading_sentence(&id, 4550).unwrap();
        assert_eq!(sentence.as_str(), Some("$HDHDT,045,T*31\r\n"));

        let sentence = heading_sentence(&id, 35999).unwrap();
        assert_eq!(sentence.as_str(), Some("$HDHDT,359,T*3F\r\n"));

        let id = SentenceId::new("HCHDG").unwrap();
        let sentence = heading_sentence(&id, 12399).unwrap();
        assert_eq!(sentence.as_bytes(), b"$HCHDG,123,T*24\r\n");
    }
}
