//! Streaming CBOR encoder.
//!
//! Serialized bytes accumulate in a fixed 2 KiB buffer and are flushed to the
//! output sink whenever the next item might not fit. Integers always take the
//! smallest CBOR head that holds them, strings longer than the buffer are
//! written in segments, and the sink can be rotated mid-stream.

use log::trace;

use crate::error::Result;
use crate::writer::{OutputCompression, OutputDestination, OutputWriter};

pub const ENCODER_BUFFER_SIZE: usize = 2048;

const MAJOR_UNSIGNED: u8 = 0x00;
const MAJOR_NEGATIVE: u8 = 0x20;
const MAJOR_BYTE_STRING: u8 = 0x40;
const MAJOR_TEXT_STRING: u8 = 0x60;
const MAJOR_ARRAY: u8 = 0x80;
const MAJOR_MAP: u8 = 0xA0;
const MAJOR_SIMPLE: u8 = 0xE0;

const SIMPLE_FALSE: u64 = 20;
const SIMPLE_TRUE: u64 = 21;
const BREAK: u8 = 0xFF;
const INDEFINITE: u8 = 31;

/// CBOR writer over a (possibly compressing) output sink.
///
/// Cannot fail on well-typed input; every error it returns originates in the
/// sink or its compression codec. All `write_*` methods report the number of
/// serialized (pre-compression) bytes they produced.
pub struct CborEncoder {
    sink: OutputWriter,
    buffer: [u8; ENCODER_BUFFER_SIZE],
    len: usize,
}

impl CborEncoder {
    pub fn new(
        destination: OutputDestination,
        compression: OutputCompression,
    ) -> Result<CborEncoder> {
        Ok(CborEncoder {
            sink: OutputWriter::open(destination, compression)?,
            buffer: [0; ENCODER_BUFFER_SIZE],
            len: 0,
        })
    }

    /// Start a definite-length array of `size` elements.
    pub fn write_array_start(&mut self, size: usize) -> Result<usize> {
        self.ensure(9)?;
        Ok(self.put_head(MAJOR_ARRAY, size as u64))
    }

    /// Start an indefinite-length array; close it with [`Self::write_break`].
    pub fn write_indef_array_start(&mut self) -> Result<usize> {
        self.ensure(1)?;
        self.buffer[self.len] = MAJOR_ARRAY | INDEFINITE;
        self.len += 1;
        Ok(1)
    }

    /// Start a definite-length map of `size` key/value pairs.
    pub fn write_map_start(&mut self, size: usize) -> Result<usize> {
        self.ensure(9)?;
        Ok(self.put_head(MAJOR_MAP, size as u64))
    }

    /// Start an indefinite-length map; close it with [`Self::write_break`].
    pub fn write_indef_map_start(&mut self) -> Result<usize> {
        self.ensure(1)?;
        self.buffer[self.len] = MAJOR_MAP | INDEFINITE;
        self.len += 1;
        Ok(1)
    }

    /// Write the break stop code that terminates indefinite containers.
    pub fn write_break(&mut self) -> Result<usize> {
        self.ensure(1)?;
        self.buffer[self.len] = BREAK;
        self.len += 1;
        Ok(1)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<usize> {
        self.ensure(1)?;
        let simple = if value { SIMPLE_TRUE } else { SIMPLE_FALSE };
        Ok(self.put_head(MAJOR_SIMPLE, simple))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<usize> {
        self.ensure(2)?;
        Ok(self.put_head(MAJOR_UNSIGNED, value as u64))
    }

    pub fn write_u16(&mut self, value: u16) -> Result<usize> {
        self.ensure(3)?;
        Ok(self.put_head(MAJOR_UNSIGNED, value as u64))
    }

    pub fn write_u32(&mut self, value: u32) -> Result<usize> {
        self.ensure(5)?;
        Ok(self.put_head(MAJOR_UNSIGNED, value as u64))
    }

    pub fn write_u64(&mut self, value: u64) -> Result<usize> {
        self.ensure(9)?;
        Ok(self.put_head(MAJOR_UNSIGNED, value))
    }

    /// Write a signed integer; negatives use major type 1 with value `-1-n`.
    pub fn write_i64(&mut self, value: i64) -> Result<usize> {
        self.ensure(9)?;
        if value < 0 {
            Ok(self.put_head(MAJOR_NEGATIVE, !value as u64))
        } else {
            Ok(self.put_head(MAJOR_UNSIGNED, value as u64))
        }
    }

    pub fn write_bytestring(&mut self, data: &[u8]) -> Result<usize> {
        self.ensure(9)?;
        let head = self.put_head(MAJOR_BYTE_STRING, data.len() as u64);
        self.write_raw(data)?;
        Ok(head + data.len())
    }

    pub fn write_textstring(&mut self, text: &str) -> Result<usize> {
        self.ensure(9)?;
        let head = self.put_head(MAJOR_TEXT_STRING, text.len() as u64);
        self.write_raw(text.as_bytes())?;
        Ok(head + text.len())
    }

    /// Flush pending bytes, then swap the sink to a new target. Compression
    /// state is finalized on the old target and restarted on the new one.
    pub fn rotate_sink(&mut self, destination: OutputDestination) -> Result<()> {
        self.flush()?;
        self.sink.rotate(destination)
    }

    /// Flush pending bytes and finalize the sink (codec trailer, `.part`
    /// rename). The encoder is unusable for writes afterwards.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.sink.finish()
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.len > 0 {
            trace!("flushing {} buffered bytes to output", self.len);
            self.sink.write(&self.buffer[..self.len])?;
            self.len = 0;
        }
        Ok(())
    }

    fn ensure(&mut self, needed: usize) -> Result<()> {
        if ENCODER_BUFFER_SIZE - self.len < needed {
            self.flush()?;
        }
        Ok(())
    }

    /// Write a type byte plus minimal-length value. The caller has ensured
    /// at least 9 bytes of buffer space.
    fn put_head(&mut self, major: u8, value: u64) -> usize {
        let p = self.len;
        let written = if value <= 23 {
            self.buffer[p] = major | value as u8;
            1
        } else if value <= u8::MAX as u64 {
            self.buffer[p] = major | 24;
            self.buffer[p + 1] = value as u8;
            2
        } else if value <= u16::MAX as u64 {
            self.buffer[p] = major | 25;
            self.buffer[p + 1..p + 3].copy_from_slice(&(value as u16).to_be_bytes());
            3
        } else if value <= u32::MAX as u64 {
            self.buffer[p] = major | 26;
            self.buffer[p + 1..p + 5].copy_from_slice(&(value as u32).to_be_bytes());
            5
        } else {
            self.buffer[p] = major | 27;
            self.buffer[p + 1..p + 9].copy_from_slice(&value.to_be_bytes());
            9
        };
        self.len += written;
        written
    }

    /// Copy string payload into the buffer, segmenting across flushes when
    /// the payload is longer than the remaining space.
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        loop {
            let avail = ENCODER_BUFFER_SIZE - self.len;
            if rest.len() <= avail {
                self.buffer[self.len..self.len + rest.len()].copy_from_slice(rest);
                self.len += rest.len();
                return Ok(());
            }
            self.buffer[self.len..].copy_from_slice(&rest[..avail]);
            self.len = ENCODER_BUFFER_SIZE;
            rest = &rest[avail..];
            self.flush()?;
        }
    }
}
