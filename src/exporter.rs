//! Writing C-DNS files.

use log::{error, trace};

use crate::TableIndex;
use crate::block::{BlockStatistics, CdnsBlock};
use crate::encoder::CborEncoder;
use crate::error::{CdnsError, Result};
use crate::file_preamble::{BlockParameters, FilePreamble};
use crate::records::{
    GenericAddressEventCount, GenericMalformedMessage, GenericQueryResponse,
};
use crate::writer::{OutputCompression, OutputDestination};

/// The file type marker leading every C-DNS file.
pub const FILE_TYPE_ID: &str = "C-DNS";

/// Main entry point for producing C-DNS output.
///
/// The exporter owns the file preamble, one block in progress and the
/// encoder over its output sink. Records buffered through the `buffer_*`
/// methods accumulate in the block; once an append fills it, the block is
/// written out automatically and the method reports the bytes emitted. The
/// file header goes out ahead of the first block written to each target and
/// the indefinite blocks array is closed with a break on [`Self::close`]
/// or rotation.
///
/// All byte counts report serialized bytes handed to the output sink,
/// before any compression.
pub struct CdnsExporter {
    file_preamble: FilePreamble,
    block: CdnsBlock,
    encoder: CborEncoder,
    active_block_parameters: TableIndex,
    blocks_written: u64,
    closed: bool,
}

impl CdnsExporter {
    /// Open `destination` and get ready to buffer records under the
    /// preamble's first block parameters. Nothing is written until the
    /// first block goes out.
    pub fn new(
        file_preamble: FilePreamble,
        destination: OutputDestination,
        compression: OutputCompression,
    ) -> Result<CdnsExporter> {
        let default_parameters = file_preamble.block_parameters(0)?.clone();
        Ok(CdnsExporter {
            file_preamble,
            block: CdnsBlock::new(default_parameters, 0),
            encoder: CborEncoder::new(destination, compression)?,
            active_block_parameters: 0,
            blocks_written: 0,
            closed: false,
        })
    }

    /// Buffer one query/response pair. Returns the bytes written if the
    /// append filled the block and flushed it, 0 otherwise.
    pub fn buffer_query_response(
        &mut self,
        record: &GenericQueryResponse,
        statistics: Option<&BlockStatistics>,
    ) -> Result<usize> {
        if self.block.add_query_response(record, statistics) {
            return self.write_block();
        }
        Ok(0)
    }

    /// Buffer one address event; aggregates with equal events already in
    /// the block. Returns as [`Self::buffer_query_response`].
    pub fn buffer_address_event(
        &mut self,
        event: &GenericAddressEventCount,
        statistics: Option<&BlockStatistics>,
    ) -> Result<usize> {
        if self.block.add_address_event(event, statistics) {
            return self.write_block();
        }
        Ok(0)
    }

    /// Buffer one malformed message. Returns as
    /// [`Self::buffer_query_response`].
    pub fn buffer_malformed_message(
        &mut self,
        message: &GenericMalformedMessage,
        statistics: Option<&BlockStatistics>,
    ) -> Result<usize> {
        if self.block.add_malformed_message(message, statistics) {
            return self.write_block();
        }
        Ok(0)
    }

    /// Write the internally buffered block now, then start a fresh one
    /// under the active block parameters. A no-op on an empty block.
    pub fn write_block(&mut self) -> Result<usize> {
        if self.block.item_count() == 0 {
            return Ok(0);
        }

        let mut written = 0;
        if self.blocks_written == 0 {
            written += self.write_file_header()?;
        }
        written += self.block.write(&mut self.encoder)?;
        self.blocks_written += 1;
        trace!("wrote block {} to output", self.blocks_written);

        self.block.clear();
        let params = self
            .file_preamble
            .block_parameters(self.active_block_parameters)?
            .clone();
        self.block
            .set_block_parameters(params, self.active_block_parameters)?;

        Ok(written)
    }

    /// Write an externally assembled block. The block is not checked
    /// against this exporter's parameters; that is the caller's business.
    pub fn export_block(&mut self, block: &CdnsBlock) -> Result<usize> {
        if block.item_count() == 0 {
            return Ok(0);
        }

        let mut written = 0;
        if self.blocks_written == 0 {
            written += self.write_file_header()?;
        }
        written += block.write(&mut self.encoder)?;
        self.blocks_written += 1;
        Ok(written)
    }

    /// Close the current output (terminating its blocks array if one was
    /// started) and continue writing to a new target. With
    /// `export_current_block` the buffered block is written out first.
    /// Returns the bytes written while closing.
    pub fn rotate_output(
        &mut self,
        destination: OutputDestination,
        export_current_block: bool,
    ) -> Result<usize> {
        let mut written = 0;
        if export_current_block {
            written += self.write_block()?;
        }
        if self.blocks_written > 0 {
            written += self.encoder.write_break()?;
        }
        self.encoder.rotate_sink(destination)?;
        self.blocks_written = 0;
        self.closed = false;
        Ok(written)
    }

    /// Terminate the blocks array, finalize the compression codec and
    /// publish the output file. The buffered block is NOT written first;
    /// call [`Self::write_block`] for that. Idempotent.
    pub fn close(&mut self) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        let mut written = 0;
        if self.blocks_written > 0 {
            written += self.encoder.write_break()?;
        }
        self.encoder.finish()?;
        self.closed = true;
        Ok(written)
    }

    /// Items buffered in the current block, all three arrays combined.
    pub fn block_item_count(&self) -> usize {
        self.block.item_count()
    }

    pub fn block_qr_count(&self) -> usize {
        self.block.qr_count()
    }

    pub fn block_aec_count(&self) -> usize {
        self.block.aec_count()
    }

    pub fn block_mm_count(&self) -> usize {
        self.block.mm_count()
    }

    /// Blocks written to the current output target; resets on rotation.
    pub fn blocks_written_count(&self) -> u64 {
        self.blocks_written
    }

    pub fn file_preamble(&self) -> &FilePreamble {
        &self.file_preamble
    }

    /// Register another parameter set in the file preamble and get its
    /// index back. If blocks were already written to the current target,
    /// the new entry only reaches the preamble of the next rotated output.
    pub fn add_block_parameters(&mut self, params: BlockParameters) -> TableIndex {
        self.file_preamble.add_block_parameters(params)
    }

    /// Choose the parameters used by subsequently started blocks. Does not
    /// affect the block currently in progress; write it out first to switch
    /// immediately.
    pub fn set_active_block_parameters(&mut self, index: TableIndex) -> Result<()> {
        if index as usize >= self.file_preamble.block_parameters_count() {
            return Err(CdnsError::IndexRange(format!(
                "block parameters index {index} out of range ({} entries)",
                self.file_preamble.block_parameters_count()
            )));
        }
        self.active_block_parameters = index;
        Ok(())
    }

    pub fn active_block_parameters_index(&self) -> TableIndex {
        self.active_block_parameters
    }

    pub fn active_block_parameters(&self) -> Result<&BlockParameters> {
        self.file_preamble
            .block_parameters(self.active_block_parameters)
    }

    /// File header: the outer 3-element array holding the type marker, the
    /// file preamble and the start of the indefinite blocks array.
    fn write_file_header(&mut self) -> Result<usize> {
        let mut written = self.encoder.write_array_start(3)?;
        written += self.encoder.write_textstring(FILE_TYPE_ID)?;
        written += self.file_preamble.write(&mut self.encoder)?;
        written += self.encoder.write_indef_array_start()?;
        trace!("wrote C-DNS file header");
        Ok(written)
    }
}

impl Drop for CdnsExporter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                error!("failed to finalize C-DNS output: {e}");
            }
        }
    }
}
