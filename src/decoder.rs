//! Streaming CBOR decoder.
//!
//! Reads from any [`std::io::Read`] behind a bounded 64 KiB read-ahead
//! buffer. Typed readers enforce major types; unknown items of any shape can
//! be skipped wholesale, which is how forward compatibility with unknown map
//! keys works everywhere in the file format.

use std::io::Read;

use crate::error::{CdnsError, Result};

pub const DECODER_BUFFER_SIZE: usize = 65535;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTE_STRING: u8 = 2;
const MAJOR_TEXT_STRING: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

const SIMPLE_FALSE: u8 = 20;
const SIMPLE_TRUE: u8 = 21;
const INDEFINITE: u8 = 31;
const BREAK_BYTE: u8 = 0xFF;

/// Logical CBOR type of the next item, as reported by
/// [`CborDecoder::peek_type`]. The break stop code shows up as its own type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CborType {
    Unsigned,
    Negative,
    ByteString,
    TextString,
    Array,
    Map,
    Tag,
    Simple,
    Break,
}

impl CborType {
    fn from_byte(byte: u8) -> CborType {
        if byte == BREAK_BYTE {
            return CborType::Break;
        }
        match byte >> 5 {
            MAJOR_UNSIGNED => CborType::Unsigned,
            MAJOR_NEGATIVE => CborType::Negative,
            MAJOR_BYTE_STRING => CborType::ByteString,
            MAJOR_TEXT_STRING => CborType::TextString,
            MAJOR_ARRAY => CborType::Array,
            MAJOR_MAP => CborType::Map,
            MAJOR_TAG => CborType::Tag,
            _ => CborType::Simple,
        }
    }
}

/// CBOR reader over a byte source.
pub struct CborDecoder<R: Read> {
    input: R,
    buffer: Vec<u8>,
    pos: usize,
    end: usize,
}

impl<R: Read> CborDecoder<R> {
    pub fn new(input: R) -> CborDecoder<R> {
        CborDecoder {
            input,
            buffer: vec![0; DECODER_BUFFER_SIZE],
            pos: 0,
            end: 0,
        }
    }

    /// Major type of the next item without consuming any input.
    pub fn peek_type(&mut self) -> Result<CborType> {
        self.fill()?;
        Ok(CborType::from_byte(self.buffer[self.pos]))
    }

    pub fn read_unsigned(&mut self) -> Result<u64> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_UNSIGNED {
            return Err(wrong_major("read_unsigned", major));
        }
        check_additional(additional, false)?;
        self.read_uint(additional)
    }

    pub fn read_negative(&mut self) -> Result<i64> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_NEGATIVE {
            return Err(wrong_major("read_negative", major));
        }
        check_additional(additional, false)?;
        Ok(-1 - self.read_uint(additional)? as i64)
    }

    /// Read an unsigned or negative integer, whichever comes next.
    pub fn read_integer(&mut self) -> Result<i64> {
        match self.peek_type()? {
            CborType::Unsigned => Ok(self.read_unsigned()? as i64),
            CborType::Negative => self.read_negative(),
            other => Err(CdnsError::Decode(format!(
                "read_integer() called on wrong major type {other:?}"
            ))),
        }
    }

    /// Read a bool: CBOR simple 20/21, or an unsigned integer where zero is
    /// false (some producers write bools that way).
    pub fn read_bool(&mut self) -> Result<bool> {
        let (major, additional) = self.read_head()?;
        match major {
            MAJOR_SIMPLE => match additional {
                SIMPLE_FALSE => Ok(false),
                SIMPLE_TRUE => Ok(true),
                _ => Err(CdnsError::Decode(
                    "CBOR additional information value isn't bool".to_string(),
                )),
            },
            MAJOR_UNSIGNED => {
                check_additional(additional, false)?;
                Ok(self.read_uint(additional)? != 0)
            }
            _ => Err(wrong_major("read_bool", major)),
        }
    }

    pub fn read_bytestring(&mut self) -> Result<Vec<u8>> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_BYTE_STRING {
            return Err(wrong_major("read_bytestring", major));
        }
        check_additional(additional, true)?;
        self.read_string_body(major, additional)
    }

    pub fn read_textstring(&mut self) -> Result<String> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_TEXT_STRING {
            return Err(wrong_major("read_textstring", major));
        }
        check_additional(additional, true)?;
        let bytes = self.read_string_body(major, additional)?;
        String::from_utf8(bytes)
            .map_err(|_| CdnsError::Decode("text string is not valid UTF-8".to_string()))
    }

    /// Read an array head. Returns `(length, false)` for a definite array
    /// and `(0, true)` for an indefinite one.
    pub fn read_array_start(&mut self) -> Result<(u64, bool)> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_ARRAY {
            return Err(wrong_major("read_array_start", major));
        }
        check_additional(additional, true)?;
        if additional == INDEFINITE {
            return Ok((0, true));
        }
        Ok((self.read_uint(additional)?, false))
    }

    /// Read a map head; same convention as [`Self::read_array_start`].
    pub fn read_map_start(&mut self) -> Result<(u64, bool)> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_MAP {
            return Err(wrong_major("read_map_start", major));
        }
        check_additional(additional, true)?;
        if additional == INDEFINITE {
            return Ok((0, true));
        }
        Ok((self.read_uint(additional)?, false))
    }

    /// Iterate a possibly-indefinite array, invoking `cb` once per element.
    pub fn read_array<F>(&mut self, mut cb: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<()>,
    {
        let (mut length, indef) = self.read_array_start()?;
        while length > 0 || indef {
            if indef && self.peek_type()? == CborType::Break {
                self.read_break()?;
                break;
            }
            cb(self)?;
            length = length.saturating_sub(1);
        }
        Ok(())
    }

    /// Iterate a possibly-indefinite map, handing each integer key to `cb`.
    /// The callback must consume exactly one value per call (or skip it).
    pub fn read_map<F>(&mut self, mut cb: F) -> Result<()>
    where
        F: FnMut(&mut Self, i64) -> Result<()>,
    {
        let (mut length, indef) = self.read_map_start()?;
        while length > 0 || indef {
            if indef && self.peek_type()? == CborType::Break {
                self.read_break()?;
                break;
            }
            let key = self.read_integer()?;
            cb(self, key)?;
            length = length.saturating_sub(1);
        }
        Ok(())
    }

    /// Consume a break stop code; fails if the next item is not one.
    pub fn read_break(&mut self) -> Result<()> {
        let (major, additional) = self.read_head()?;
        if major != MAJOR_SIMPLE || additional != INDEFINITE {
            return Err(wrong_major("read_break", major));
        }
        Ok(())
    }

    /// Consume exactly one item of arbitrary shape, containers included.
    pub fn skip_item(&mut self) -> Result<()> {
        let (major, additional) = self.read_head()?;
        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE => {
                check_additional(additional, false)?;
                self.read_uint(additional)?;
            }
            MAJOR_TAG => {
                check_additional(additional, false)?;
                self.read_uint(additional)?;
                // the tagged item itself
                self.skip_item()?;
            }
            MAJOR_SIMPLE => {
                check_additional(additional, true)?;
                if additional != INDEFINITE {
                    self.read_uint(additional)?;
                }
            }
            MAJOR_BYTE_STRING | MAJOR_TEXT_STRING => {
                check_additional(additional, true)?;
                self.read_string_body(major, additional)?;
            }
            MAJOR_ARRAY | MAJOR_MAP => {
                check_additional(additional, true)?;
                if additional == INDEFINITE {
                    loop {
                        if self.peek_type()? == CborType::Break {
                            self.pos += 1;
                            break;
                        }
                        self.skip_item()?;
                        if major == MAJOR_MAP {
                            self.skip_item()?;
                        }
                    }
                } else {
                    let count = self.read_uint(additional)?;
                    for _ in 0..count {
                        self.skip_item()?;
                        if major == MAJOR_MAP {
                            self.skip_item()?;
                        }
                    }
                }
            }
            unknown => {
                return Err(CdnsError::Decode(format!(
                    "unknown CBOR major type {unknown}"
                )));
            }
        }
        Ok(())
    }

    /// First byte of the next item, split into major type and additional
    /// information.
    fn read_head(&mut self) -> Result<(u8, u8)> {
        let byte = self.next_byte()?;
        Ok((byte >> 5, byte & 0x1F))
    }

    /// Value encoded by the additional information: either immediate
    /// (<= 23) or read from the following 1, 2, 4 or 8 bytes.
    fn read_uint(&mut self, additional: u8) -> Result<u64> {
        if additional <= 23 {
            return Ok(additional as u64);
        }
        let mut value: u64 = 0;
        for _ in 0..(1usize << (additional - 24)) {
            value = (value << 8) | self.next_byte()? as u64;
        }
        Ok(value)
    }

    /// String payload, definite or chunked-indefinite. Chunks must carry the
    /// same major type and may not themselves be indefinite.
    fn read_string_body(&mut self, major: u8, additional: u8) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        if additional != INDEFINITE {
            let length = self.read_uint(additional)?;
            self.take_bytes(length, &mut data)?;
            return Ok(data);
        }

        while self.peek_type()? != CborType::Break {
            let (chunk_major, chunk_additional) = self.read_head()?;
            if chunk_major != major {
                return Err(CdnsError::Decode(format!(
                    "different chunk major type inside indefinite length string: {chunk_major}"
                )));
            }
            if chunk_additional == INDEFINITE {
                return Err(CdnsError::Decode(
                    "indefinite length chunk inside indefinite length string".to_string(),
                ));
            }
            check_additional(chunk_additional, false)?;
            let length = self.read_uint(chunk_additional)?;
            self.take_bytes(length, &mut data)?;
        }
        self.read_break()?;

        Ok(data)
    }

    fn take_bytes(&mut self, length: u64, out: &mut Vec<u8>) -> Result<()> {
        out.reserve(length as usize);
        for _ in 0..length {
            out.push(self.next_byte()?);
        }
        Ok(())
    }

    fn next_byte(&mut self) -> Result<u8> {
        self.fill()?;
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn fill(&mut self) -> Result<()> {
        while self.pos == self.end {
            match self.input.read(&mut self.buffer) {
                Ok(0) => return Err(CdnsError::EndOfInput),
                Ok(n) => {
                    self.pos = 0;
                    self.end = n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn wrong_major(operation: &str, major: u8) -> CdnsError {
    CdnsError::Decode(format!(
        "{operation}() called on wrong major type {major}"
    ))
}

/// Additional-information values 28-30 are reserved by CBOR and always
/// rejected; 31 (indefinite) is only valid for strings and containers.
fn check_additional(additional: u8, allow_indefinite: bool) -> Result<()> {
    match additional {
        28..=30 => Err(CdnsError::Decode(format!(
            "unsupported CBOR additional information value: {additional}"
        ))),
        31 if !allow_indefinite => Err(CdnsError::Decode(format!(
            "unsupported CBOR additional information value: {additional}"
        ))),
        _ => Ok(()),
    }
}
