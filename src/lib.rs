//! Reader and writer for C-DNS, the compacted file format for DNS traffic
//! captures defined by [RFC 8618](https://www.rfc-editor.org/rfc/rfc8618).
//!
//! A C-DNS file is one CBOR document: a `"C-DNS"` type marker, a file
//! preamble carrying format versions and block parameter sets, and a
//! sequence of blocks. Each block holds captured query/response pairs,
//! aggregated per-address event counters and malformed messages, with
//! repeated values (addresses, names, record shapes) deduplicated into
//! per-block tables and timestamps stored relative to the block's earliest
//! record.
//!
//! [`CdnsExporter`] buffers records into a block and writes blocks out as
//! they fill, optionally gzip- or xz-compressed, with atomic `.part` file
//! staging and output rotation. [`CdnsReader`] walks the same path in
//! reverse, rehydrating one block at a time back into plain records.
//!
//! ```no_run
//! use cdns::{
//!     CdnsExporter, CdnsReader, FilePreamble, GenericQueryResponse, OutputCompression,
//!     Timestamp,
//! };
//!
//! fn main() -> cdns::Result<()> {
//!     let mut exporter = CdnsExporter::new(
//!         FilePreamble::default(),
//!         "capture.cdns".into(),
//!         OutputCompression::Uncompressed,
//!     )?;
//!     let record = GenericQueryResponse {
//!         ts: Some(Timestamp::new(1650233100, 297413)),
//!         client_ip: Some("192.0.2.7".parse().expect("a valid address")),
//!         client_port: Some(53004),
//!         ..Default::default()
//!     };
//!     exporter.buffer_query_response(&record, None)?;
//!     exporter.write_block()?;
//!     exporter.close()?;
//!
//!     let mut reader = CdnsReader::new(std::fs::File::open("capture.cdns")?)?;
//!     while let Some(mut block) = reader.read_block()? {
//!         while let Some(qr) = block.next_query_response()? {
//!             println!("{:?} from {:?}", qr.ts, qr.client_ip);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod block;
pub mod block_read;
pub mod block_table;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod file_preamble;
pub mod format;
pub mod hash;
pub mod records;
pub mod timestamp;
pub mod writer;

pub mod exporter;
pub mod reader;

#[cfg(test)]
mod tests;

/// Index into a block table or the file preamble's parameters array.
/// 0-based, dense, allocated in insertion order, valid only within the
/// block (or file) that produced it.
pub type TableIndex = u32;

pub use block::{
    AddressEventCount, BlockPreamble, BlockStatistics, CdnsBlock, ClassType, MalformedMessage,
    MalformedMessageData, QueryResponse, QueryResponseExtended, QueryResponseSignature, Question,
    ResponseProcessingData, Rr,
};
pub use block_read::CdnsBlockRead;
pub use block_table::BlockTable;
pub use decoder::{CborDecoder, CborType};
pub use encoder::CborEncoder;
pub use error::{CdnsError, Result};
pub use exporter::{CdnsExporter, FILE_TYPE_ID};
pub use file_preamble::{
    BlockParameters, CollectionParameters, FilePreamble, StorageHints, StorageParameters,
};
pub use format::{AddressEventType, QueryResponseType};
pub use reader::CdnsReader;
pub use records::{
    GenericAddressEventCount, GenericMalformedMessage, GenericQueryResponse,
    GenericResourceRecord,
};
pub use timestamp::Timestamp;
pub use writer::{OutputCompression, OutputDestination};
