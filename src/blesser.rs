//! Per-byte glue between the GPS input, the sync loop and the heading filter.

use core::fmt::Write;

use crate::clock::{naive_time_of_ticks, SharedTickClock};
use crate::config::Config;
use crate::heading::{heading_sentence, HeadingFilter, HeadingSentence};
use crate::logging::warn;
use crate::nmea::{SentenceEvent, SentenceParser};
use crate::sync::{Correction, SyncLoop};
use crate::ticker::HeadingCadence;
use crate::FmtBuf;

/// Diagnostic line for the setup channel.
pub type Report = FmtBuf<32>;

/// Outcome of one GPS byte.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    /// Set when the byte completed a time sentence.
    pub correction: Option<Correction>,
    /// Heading sentence to transmit right after the echoed byte.
    pub heading: Option<HeadingSentence>,
}

impl Step {
    /// Text to show on the setup channel for this step. First fixes are always
    /// reported, ordinary corrections only with `realtime_show`.
    pub fn report(&self, config: &Config) -> Option<Report> {
        let mut report = Report::new();
        let written = match self.correction? {
            Correction::FirstFix { ticks, .. } => match naive_time_of_ticks(ticks) {
                Some(time) => write!(report, "\r\nFirst tick! {}\r\n", time),
                None => report.write_str("\r\nFirst tick!\r\n"),
            },
            Correction::Offset(ofs) if config.realtime_show() => write!(report, "ofs={}\r\n", ofs),
            Correction::Offset(_) => return None,
        };
        written.ok().map(|()| report)
    }
}

pub struct Blesser<'a> {
    clock: &'a SharedTickClock,
    cadence: &'a HeadingCadence,
    parser: SentenceParser,
    sync: SyncLoop,
    heading: HeadingFilter,
    /// Last heading sentence built, resent on every cadence until replaced
    sentence: Option<HeadingSentence>,
}

impl<'a> Blesser<'a> {
    pub fn new(clock: &'a SharedTickClock, cadence: &'a HeadingCadence) -> Self {
        Self::with_parser(clock, cadence, SentenceParser::new())
    }

    pub fn with_parser(
        clock: &'a SharedTickClock,
        cadence: &'a HeadingCadence,
        parser: SentenceParser,
    ) -> Self {
        Self {
            clock,
            cadence,
            parser,
            sync: SyncLoop::new(),
            heading: HeadingFilter::new(),
            sentence: None,
        }
    }

    pub fn sync(&self) -> &SyncLoop {
        &self.sync
    }

    pub fn heading(&self) -> &HeadingFilter {
        &self.heading
    }

    /// Current heading sentence, if a course has been seen.
    pub fn sentence(&self) -> Option<&HeadingSentence> {
        self.sentence.as_ref()
    }

    /// Handles one byte from the GPS. Call as soon as the byte arrives, before
    /// echoing it, so a `$` is stamped with the tick it was received on. The
    /// echo goes out ahead of anything in the returned [`Step`].
    pub fn handle_gps_byte(&mut self, byte: u8, config: &Config) -> Step {
        if byte == b'$' {
            self.sync.mark_sentence_start(self.clock);
        }

        let mut step = Step::default();
        match self.parser.feed(byte) {
            Some(SentenceEvent::Time { ticks, .. }) => {
                step.correction = Some(self.sync.apply(self.clock, ticks, config.sync_limits()));
            }
            Some(SentenceEvent::Course { hundredths }) => {
                let course = self.heading.update(hundredths, config.reaction_speed());
                match heading_sentence(config.compass_sentence(), course) {
                    Ok(sentence) => self.sentence = Some(sentence),
                    Err(_) => warn!("blesser: heading sentence does not fit"),
                }
            }
            None => {}
        }

        // only between sentences, so the heading never splits an echoed one
        if byte == b'\n' && self.sentence.is_some() && self.cadence.take() {
            step.heading = self.sentence.clone();
        }
        step
    }
}
