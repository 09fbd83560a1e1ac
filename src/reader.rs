//! Reading C-DNS files.

use std::io::Read;

use log::trace;

use crate::block_read::CdnsBlockRead;
use crate::decoder::{CborDecoder, CborType};
use crate::error::{CdnsError, Result};
use crate::exporter::FILE_TYPE_ID;
use crate::file_preamble::FilePreamble;

/// Main entry point for consuming C-DNS input.
///
/// Construction reads the file header: the outer 3-element array, the
/// `"C-DNS"` type marker (matched case-insensitively), the file preamble
/// and the head of the blocks array. Blocks then come back one at a time
/// from [`Self::read_block`], each fully rehydrated. The input must be
/// uncompressed; wrap a decompressor around compressed files first.
pub struct CdnsReader<R: Read> {
    decoder: CborDecoder<R>,
    pub file_preamble: FilePreamble,
    blocks_count: u64,
    blocks_read: u64,
    indef_blocks: bool,
}

impl<R: Read> CdnsReader<R> {
    pub fn new(input: R) -> Result<CdnsReader<R>> {
        let mut decoder = CborDecoder::new(input);

        let (length, indef) = decoder.read_array_start()?;
        if length != 3 && !indef {
            return Err(CdnsError::Decode(
                "invalid structure of C-DNS file".to_string(),
            ));
        }

        let file_type = decoder.read_textstring()?;
        if !file_type.eq_ignore_ascii_case(FILE_TYPE_ID) {
            return Err(CdnsError::Decode(format!(
                "invalid file type ID: {file_type}"
            )));
        }

        let file_preamble = FilePreamble::read(&mut decoder)?;
        let (blocks_count, indef_blocks) = decoder.read_array_start()?;
        trace!(
            "read C-DNS file header, format version {}.{}",
            file_preamble.major_format_version, file_preamble.minor_format_version
        );

        Ok(CdnsReader {
            decoder,
            file_preamble,
            blocks_count,
            blocks_read: 0,
            indef_blocks,
        })
    }

    /// The next block, or `None` once the blocks array is exhausted (its
    /// declared count is reached or its break code shows up).
    pub fn read_block(&mut self) -> Result<Option<CdnsBlockRead>> {
        if self.indef_blocks {
            if self.decoder.peek_type()? == CborType::Break {
                self.decoder.read_break()?;
                self.indef_blocks = false;
                self.blocks_count = self.blocks_read;
                return Ok(None);
            }
        } else if self.blocks_read == self.blocks_count {
            return Ok(None);
        }

        let block = CdnsBlockRead::read(&mut self.decoder, &self.file_preamble.block_parameters)?;
        self.blocks_read += 1;
        Ok(Some(block))
    }

    /// Blocks returned so far.
    pub fn blocks_read_count(&self) -> u64 {
        self.blocks_read
    }
}
