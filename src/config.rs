//! Operator settings for the pulse output, clock discipline and heading
//! sentence, with the console's range rules and factory defaults.

use core::fmt;

use thiserror::Error;

use crate::sync::SyncLimits;
use crate::ticker::PulseSettings;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("{name} {value} is out of the range {min} .. {max}")]
    OutOfRange {
        name: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },
    #[error("sentence id must be exactly 5 letters or digits")]
    BadSentenceId,
}

/// Five-character talker + type of the synthesized heading sentence, e.g. `HDHDT`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SentenceId([u8; 5]);

impl SentenceId {
    pub const HDHDT: Self = Self(*b"HDHDT");

    pub fn new(id: &str) -> Result<Self, ConfigError> {
        let bytes: [u8; 5] = id
            .as_bytes()
            .try_into()
            .map_err(|_| ConfigError::BadSentenceId)?;
        if bytes.iter().all(u8::is_ascii_alphanumeric) {
            Ok(Self(bytes))
        } else {
            Err(ConfigError::BadSentenceId)
        }
    }

    pub fn as_str(&self) -> &str {
        // only ever built from ASCII
        core::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Default for SentenceId {
    fn default() -> Self {
        Self::HDHDT
    }
}

impl fmt::Display for SentenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator settings. Fields are only changed through the range-checked
/// setters; an external store loads and persists the whole snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    realtime_show: bool,
    pulse_length: i16,
    pulse_offset: i16,
    offset_limit: i16,
    jump_limit: i32,
    reaction_speed: u8,
    compass_sentence: SentenceId,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            realtime_show: true,
            pulse_length: 100,
            pulse_offset: 0,
            offset_limit: 10,
            jump_limit: 2000,
            reaction_speed: 10,
            compass_sentence: SentenceId::HDHDT,
        }
    }
}

fn in_range(name: &'static str, value: i32, min: i32, max: i32) -> Result<i32, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

impl Config {
    /// Report each clock correction on the diagnostic channel.
    pub fn realtime_show(&self) -> bool {
        self.realtime_show
    }

    pub fn set_realtime_show(&mut self, on: bool) {
        self.realtime_show = on;
    }

    /// Pulse high time in ticks (ms) at the start of every second.
    pub fn pulse_length(&self) -> i16 {
        self.pulse_length
    }

    pub fn set_pulse_length(&mut self, ms: i32) -> Result<(), ConfigError> {
        self.pulse_length = in_range("pulse length", ms, 1, 999)? as i16;
        Ok(())
    }

    /// Shift of the pulse against the second boundary, in ticks (ms).
    pub fn pulse_offset(&self) -> i16 {
        self.pulse_offset
    }

    pub fn set_pulse_offset(&mut self, ms: i32) -> Result<(), ConfigError> {
        self.pulse_offset = in_range("pulse offset", ms, -1000, 1000)? as i16;
        Ok(())
    }

    pub fn offset_limit(&self) -> i16 {
        self.offset_limit
    }

    pub fn set_offset_limit(&mut self, ms: i32) -> Result<(), ConfigError> {
        self.offset_limit = in_range("offset limit", ms, -100, 100)? as i16;
        Ok(())
    }

    pub fn jump_limit(&self) -> i32 {
        self.jump_limit
    }

    pub fn set_jump_limit(&mut self, ms: i32) {
        self.jump_limit = ms;
    }

    /// Weight of a new course reading in percent, `1..=100`.
    pub fn reaction_speed(&self) -> u8 {
        self.reaction_speed
    }

    pub fn set_reaction_speed(&mut self, percent: i32) -> Result<(), ConfigError> {
        self.reaction_speed = in_range("reaction speed", percent, 1, 100)? as u8;
        Ok(())
    }

    pub fn compass_sentence(&self) -> &SentenceId {
        &self.compass_sentence
    }

    pub fn set_compass_sentence(&mut self, id: &str) -> Result<(), ConfigError> {
        self.compass_sentence = SentenceId::new(id)?;
        Ok(())
    }

    pub fn pulse(&self) -> PulseSettings {
        PulseSettings {
            length: self.pulse_length,
            offset: self.pulse_offset,
        }
    }

    pub fn sync_limits(&self) -> SyncLimits {
        SyncLimits {
            jump_limit: self.jump_limit,
            offset_limit: i32::from(self.offset_limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn defaults() {
        let config = Config::default();
        assert!(config.realtime_show());
        assert_eq!(config.pulse_length(), 100);
        assert_eq!(config.pulse_offset(), 0);
        assert_eq!(config.reaction_speed(), 10);
        assert_eq!(config.compass_sentence().as_str(), "HDHDT");
        assert_eq!(
            config.sync_limits(),
            SyncLimits {
                jump_limit: 2000,
                offset_limit: 10
            }
        );
    }

    #[test_log::test]
    fn setters_enforce_ranges() {
        let mut config = Config::default();
        assert_eq!(config.set_reaction_speed(100), Ok(()));
        assert_eq!(config.reaction_speed(), 100);
        assert_eq!(
            config.set_reaction_speed(0),
            Err(ConfigError::OutOfRange {
                name: "reaction speed",
                value: 0,
                min: 1,
                max: 100
            })
        );
        assert_eq!(config.reaction_speed(), 100);

        assert!(config.set_pulse_length(1000).is_err());
        assert_eq!(config.set_pulse_offset(-1000), Ok(()));
        assert!(config.set_offset_limit(101).is_err());
        assert_eq!(config.set_offset_limit(-100), Ok(()));
        config.set_jump_limit(i32::MIN);
        assert_eq!(config.sync_limits().offset_limit, -100);
        assert_eq!(config.sync_limits().jump_limit, i32::MIN);
    }

    #[test_log::test]
    fn error_messages() {
        let err = ConfigError::OutOfRange {
            name: "pulse length",
            value: 0,
            min: 1,
            max: 999,
        };
        assert_eq!(err.to_string(), "pulse length 0 is out of the range 1 .. 999");
    }

    #[test_log::test]
    fn sentence_id_validation() {
        let mut config = Config::default();
        assert_eq!(config.set_compass_sentence("HCHDG"), Ok(()));
        assert_eq!(config.compass_sentence().to_string(), "HCHDG");
        assert_eq!(config.set_compass_sentence("HCHD"), Err(ConfigError::BadSentenceId));
        assert_eq!(config.set_compass_sentence("HC HDG"), Err(ConfigError::BadSentenceId));
        assert_eq!(config.set_compass_sentence("HC-DG"), Err(ConfigError::BadSentenceId));
        assert_eq!(config.compass_sentence(), &SentenceId::new("HCHDG").unwrap());
    }
}
