//! Timestamps with a configurable subsecond resolution.

use std::fmt::Display;
use std::io::Read;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::decoder::{CborDecoder, CborType};
use crate::encoder::CborEncoder;
use crate::error::{CdnsError, Result};

pub const MILLIS_PER_SEC: u64 = 1_000;
pub const MICROS_PER_SEC: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Seconds since the UNIX epoch plus subsecond ticks.
///
/// The tick resolution is whatever `ticks_per_second` the enclosing block's
/// storage parameters declare; a `Timestamp` on its own carries no unit. On
/// the wire this is a 2-element array `[secs, ticks]` in block preambles and
/// a single unsigned offset inside records.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Timestamp {
    pub secs: u64,
    pub ticks: u64,
}

impl Timestamp {
    pub fn new(secs: u64, ticks: u64) -> Self {
        Timestamp { secs, ticks }
    }

    /// Difference against `reference` in ticks. Negative when `self` is the
    /// earlier of the two.
    pub fn time_offset_from(&self, reference: &Timestamp, ticks_per_second: u64) -> Result<i64> {
        if ticks_per_second == 0 {
            return Err(CdnsError::InvalidState(
                "ticks per second resolution is zero".to_string(),
            ));
        }

        let ticks = self.secs as i128 * ticks_per_second as i128 + self.ticks as i128;
        let reference_ticks =
            reference.secs as i128 * ticks_per_second as i128 + reference.ticks as i128;

        (ticks - reference_ticks)
            .try_into()
            .map_err(|_| CdnsError::InvalidState("timestamp offset overflows".to_string()))
    }

    /// The timestamp `offset` ticks away from this one.
    pub fn advanced_by(&self, offset: i64, ticks_per_second: u64) -> Result<Timestamp> {
        if ticks_per_second == 0 {
            return Err(CdnsError::InvalidState(
                "ticks per second resolution is zero".to_string(),
            ));
        }

        let total = self.secs as i128 * ticks_per_second as i128
            + self.ticks as i128
            + offset as i128;
        if total < 0 {
            return Err(CdnsError::InvalidState(
                "offset would place the timestamp before the epoch".to_string(),
            ));
        }

        Ok(Timestamp {
            secs: (total / ticks_per_second as i128) as u64,
            ticks: (total % ticks_per_second as i128) as u64,
        })
    }

    /// Interpret as wall-clock UTC, scaling ticks to nanoseconds. `None` for
    /// a zero resolution or a timestamp chrono can't represent.
    pub fn to_utc(&self, ticks_per_second: u64) -> Option<DateTime<Utc>> {
        if ticks_per_second == 0 {
            return None;
        }
        let nanos = self.ticks as u128 * NANOS_PER_SEC as u128 / ticks_per_second as u128;
        Utc.timestamp_opt(i64::try_from(self.secs).ok()?, u32::try_from(nanos).ok()?)
            .single()
    }

    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let mut written = enc.write_array_start(2)?;
        written += enc.write_u64(self.secs)?;
        written += enc.write_u64(self.ticks)?;
        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<Timestamp> {
        let mut secs = None;
        let mut ticks = None;

        let (length, indef) = dec.read_array_start()?;
        let mut position = 0u64;
        while position < length || indef {
            if indef && dec.peek_type()? == CborType::Break {
                dec.read_break()?;
                break;
            }
            match position {
                0 => secs = Some(dec.read_unsigned()?),
                1 => ticks = Some(dec.read_unsigned()?),
                _ => {
                    return Err(CdnsError::Decode(
                        "timestamp array has more than 2 items".to_string(),
                    ));
                }
            }
            position += 1;
        }

        match (secs, ticks) {
            (Some(secs), Some(ticks)) => Ok(Timestamp { secs, ticks }),
            _ => Err(CdnsError::Decode(
                "wrong format of the timestamp".to_string(),
            )),
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("secs={} ticks={}", self.secs, self.ticks))
    }
}
