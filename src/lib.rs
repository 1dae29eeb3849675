#![cfg_attr(not(test), no_std)]

//! Clock discipline and heading synthesis for a GPS "blesser": a box that sits
//! on an NMEA 0183 line, keeps a millisecond clock locked to GPS time, emits a
//! once-per-second pulse, and adds a smoothed heading sentence to the stream.

use core::fmt::{self, Write};

use tinyvec::ArrayVec;

pub mod blesser;
pub mod clock;
pub mod config;
pub mod heading;
pub mod logging;
pub mod nmea;
pub mod rb;
pub mod sync;
pub mod ticker;

/// Fixed-capacity text buffer for `write!`. Writing past the end fails
/// instead of truncating, so a formatted sentence is either whole or absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmtBuf<const N: usize = 256>(pub ArrayVec<[u8; N]>);

impl<const N: usize> Write for FmtBuf<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.0.len() + s.len() > N {
            return Err(fmt::Error);
        }
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl<const N: usize> FmtBuf<N> {
    pub const CAPACITY: usize = N;

    pub fn new() -> Self {
        Self(ArrayVec::from_array_len([0; N], 0))
    }

    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.0.as_slice()).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> Default for FmtBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}
