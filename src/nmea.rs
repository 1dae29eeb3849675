//! Byte-at-a-time parser for the NMEA 0183 sentences that carry time of day
//! (`GPZDA`, or `GPGGA` with the `gga-time` feature) and course over ground
//! (`GPVTG`).
//!
//! Sentences are framed as `$<talker>,<field>,...*<checksum>\r\n`. The parser
//! keeps at most one sentence in flight; a `$` always starts over, and any
//! malformed, overlong or badly checksummed sentence is dropped silently.

use chrono::NaiveTime;
use thiserror::Error;
use tinyvec::ArrayVec;

use crate::clock::TICKS_PER_SECOND;
use crate::logging::{debug, trace};

const FIELD_CAPACITY: usize = 63;
/// Fields from this index on are only checksummed, never decoded.
const MAX_FIELDS: u8 = 20;

type FieldBuf = ArrayVec<[u8; FIELD_CAPACITY]>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SentenceKind {
    Gga,
    Vtg,
    Zda,
}

impl SentenceKind {
    fn from_talker(talker: &[u8]) -> Option<Self> {
        match talker {
            b"GPGGA" => Some(SentenceKind::Gga),
            b"GPZDA" => Some(SentenceKind::Zda),
            b"GPVTG" => Some(SentenceKind::Vtg),
            _ => None,
        }
    }
}

/// Which sentence the time of day is taken from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeSource {
    /// `GPGGA` time, confirmed by a non-zero fix quality.
    Gga,
    /// `GPZDA` time; a well-formed timestamp counts as a fix.
    Zda,
}

impl Default for TimeSource {
    #[cfg(feature = "gga-time")]
    fn default() -> Self {
        TimeSource::Gga
    }

    #[cfg(not(feature = "gga-time"))]
    fn default() -> Self {
        TimeSource::Zda
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Ticks into the second, `0..TICKS_PER_SECOND`.
    pub sub_second: u16,
}

impl TimeOfDay {
    /// Absolute tick of the day.
    pub fn ticks(&self) -> i32 {
        let seconds =
            (i32::from(self.hour) * 60 + i32::from(self.minute)) * 60 + i32::from(self.second);
        seconds * TICKS_PER_SECOND + i32::from(self.sub_second)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SentenceEvent {
    /// A fixed time of day from a GGA or ZDA sentence, in ticks of the day.
    Time { kind: SentenceKind, ticks: i32 },
    /// Course over ground in hundredths of a degree, `0..36000`.
    Course { hundredths: u16 },
}

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldError {
    #[error("field is empty")]
    Empty,
    #[error("field too short ({0} bytes)")]
    TooShort(usize),
    #[error("unsupported number of fraction digits: {0}")]
    BadFraction(usize),
    #[error("invalid digit {0:#04x}")]
    NotADigit(u8),
    #[error("value out of range")]
    OutOfRange,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Fields,
    Checksum,
}

pub struct SentenceParser {
    time_source: TimeSource,
    phase: Phase,
    kind: Option<SentenceKind>,
    /// 1-based index of the field being collected
    field: u8,
    buf: FieldBuf,
    checksum: u8,
    time: Option<TimeOfDay>,
    has_fix: bool,
    course: Option<u16>,
}

impl Default for SentenceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceParser {
    pub fn new() -> Self {
        Self::with_time_source(TimeSource::default())
    }

    pub fn with_time_source(time_source: TimeSource) -> Self {
        Self {
            time_source,
            phase: Phase::Idle,
            kind: None,
            field: 0,
            buf: FieldBuf::new(),
            checksum: 0,
            time: None,
            has_fix: false,
            course: None,
        }
    }

    pub fn time_source(&self) -> TimeSource {
        self.time_source
    }

    /// True when no sentence is in flight.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Consumes one byte of GPS input. Returns an event when `b` terminates a
    /// complete sentence with a valid checksum and a usable payload.
    pub fn feed(&mut self, b: u8) -> Option<SentenceEvent> {
        match (b, self.phase) {
            (b'$', _) => {
                self.start();
                None
            }
            (_, Phase::Idle) => None,
            (b'*', phase) => {
                // the field before the checksum delimiter is complete too
                if phase == Phase::Fields {
                    self.end_field();
                }
                self.phase = Phase::Checksum;
                self.buf.clear();
                None
            }
            (b',', Phase::Fields) => {
                self.checksum ^= b;
                self.end_field();
                None
            }
            (b',', Phase::Checksum) => {
                // a separator among the checksum digits leaves nothing to compare
                self.checksum ^= b;
                self.buf.clear();
                None
            }
            (b'\r', _) => {
                let event = self.finish();
                self.reset();
                event
            }
            (b'\n', _) => None,
            (_, phase) => {
                if self.buf.try_push(b).is_some() {
                    trace!("nmea: field overflow, dropping sentence");
                    self.reset();
                } else if phase == Phase::Fields {
                    self.checksum ^= b;
                }
                None
            }
        }
    }

    fn start(&mut self) {
        self.reset();
        self.phase = Phase::Fields;
        self.field = 1;
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.kind = None;
        self.field = 0;
        self.buf.clear();
        self.checksum = 0;
        self.time = None;
        self.has_fix = false;
        self.course = None;
    }

    fn end_field(&mut self) {
        if self.field < MAX_FIELDS - 1 {
            self.decode_field();
        }
        self.buf.clear();
        self.field = self.field.saturating_add(1);
    }

    fn decode_field(&mut self) {
        match (self.kind, self.field) {
            (_, 1) => {
                self.kind = SentenceKind::from_talker(&self.buf);
                if self.kind.is_none() {
                    trace!("nmea: ignoring sentence with unknown talker");
                }
            }
            (Some(SentenceKind::Gga), 2) if self.time_source == TimeSource::Gga => {
                self.time = self.decode(parse_time);
            }
            (Some(SentenceKind::Gga), 7) if self.time_source == TimeSource::Gga => {
                self.has_fix = self.buf.first().is_some_and(|&q| q != b'0');
            }
            (Some(SentenceKind::Zda), 2) if self.time_source == TimeSource::Zda => {
                self.time = self.decode(parse_time);
                self.has_fix = self.time.is_some();
            }
            (Some(SentenceKind::Vtg), 2) => {
                self.course = self.decode(parse_course);
            }
            _ => {}
        }
    }

    fn decode<T>(&self, parse: fn(&[u8]) -> Result<T, FieldError>) -> Option<T> {
        match parse(&self.buf) {
            Ok(value) => Some(value),
            Err(_e) => {
                trace!("nmea: bad field {}: {}", self.field, _e);
                None
            }
        }
    }

    fn finish(&self) -> Option<SentenceEvent> {
        let expected = [hex_digit(self.checksum >> 4), hex_digit(self.checksum & 0x0f)];
        if self.phase != Phase::Checksum || self.buf.get(..2) != Some(&expected[..]) {
            trace!("nmea: checksum mismatch, expected {:x}", self.checksum);
            return None;
        }

        let event = match self.kind? {
            kind @ (SentenceKind::Gga | SentenceKind::Zda) => match self.time {
                Some(time) if self.has_fix => Some(SentenceEvent::Time {
                    kind,
                    ticks: time.ticks(),
                }),
                _ => None,
            },
            SentenceKind::Vtg => self
                .course
                .map(|hundredths| SentenceEvent::Course { hundredths }),
        };
        if let Some(_event) = event {
            debug!("nmea: {:?}", _event);
        }
        event
    }
}

/// Uppercase hex digit of the low nibble of `nibble`.
pub fn hex_digit(nibble: u8) -> u8 {
    b"0123456789ABCDEF"[usize::from(nibble & 0x0f)]
}

/// XOR of all bytes, as used between `$` and `*`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Parses `HHMMSS[.F]` with one to three fraction digits. Three digits are
/// truncated to 5 ms steps.
pub fn parse_time(field: &[u8]) -> Result<TimeOfDay, FieldError> {
    if field.len() < 6 {
        return Err(FieldError::TooShort(field.len()));
    }

    let sub_second = if field.len() >= 8 && field[6] == b'.' {
        let fraction = &field[7..];
        let tps = TICKS_PER_SECOND as u32;
        match fraction.len() {
            1 => decimal(fraction)? * (tps / 10),
            2 => decimal(fraction)? * (tps / 100),
            3 => (decimal(fraction)? / 5) * (tps / 200),
            n => return Err(FieldError::BadFraction(n)),
        }
    } else {
        0
    };

    let hour = decimal(&field[0..2])?;
    let minute = decimal(&field[2..4])?;
    let second = decimal(&field[4..6])?;
    NaiveTime::from_hms_opt(hour, minute, second).ok_or(FieldError::OutOfRange)?;

    Ok(TimeOfDay {
        hour: hour as u8,
        minute: minute as u8,
        second: second as u8,
        sub_second: sub_second as u16,
    })
}

/// Parses `D[.F]` degrees into hundredths of a degree. A third fraction digit
/// is truncated.
pub fn parse_course(field: &[u8]) -> Result<u16, FieldError> {
    if field.is_empty() {
        return Err(FieldError::Empty);
    }

    let hundredths = match field.iter().position(|&b| b == b'.') {
        Some(dot) if dot > 0 => {
            let whole = decimal(&field[..dot])?;
            let fraction = &field[dot + 1..];
            let fraction_value = match fraction.len() {
                1 => decimal(fraction)? * 10,
                2 => decimal(fraction)?,
                3 => decimal(fraction)? / 10,
                n => return Err(FieldError::BadFraction(n)),
            };
            whole
                .checked_mul(100)
                .and_then(|w| w.checked_add(fraction_value))
                .ok_or(FieldError::OutOfRange)?
        }
        // a leading point (".5") takes the whole-degree path and reads as 0
        _ => leading_decimal(field)?
            .checked_mul(100)
            .ok_or(FieldError::OutOfRange)?,
    };

    match u16::try_from(hundredths) {
        Ok(course) if course < 36000 => Ok(course),
        _ => Err(FieldError::OutOfRange),
    }
}

fn decimal(digits: &[u8]) -> Result<u32, FieldError> {
    digits.iter().try_fold(0u32, |acc, &b| {
        if !b.is_ascii_digit() {
            return Err(FieldError::NotADigit(b));
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u32::from(b - b'0')))
            .ok_or(FieldError::OutOfRange)
    })
}

/// Value of the leading run of digits, stopping at the first non-digit.
fn leading_decimal(field: &[u8]) -> Result<u32, FieldError> {
    let end = field
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(field.len());
    decimal(&field[..end])
}
