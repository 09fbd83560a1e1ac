use thiserror::Error;

/// When things go awry.
///
/// Decoder faults carry a human-readable description of what the input looked
/// like; I/O and compression failures keep their origin distinguishable so a
/// caller can decide whether to rotate, retry or abort.
#[derive(Debug, Error)]
pub enum CdnsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The compression codec refused the data or could not be set up
    #[error("compression error: {0}")]
    Compression(String),
    /// Ill-formed CBOR, or well-formed CBOR with unexpected structure
    #[error("decode error: {0}")]
    Decode(String),
    /// The input stream ran out between items (well-formed exhaustion)
    #[error("end of input")]
    EndOfInput,
    /// An index that doesn't resolve within its table or parameters array
    #[error("index out of range: {0}")]
    IndexRange(String),
    /// API misuse the library refuses to act on
    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, CdnsError>;
