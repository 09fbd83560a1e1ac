//! Output sinks for C-DNS data: plain file, gzip or xz.
//!
//! A filesystem target is staged as `<name><suffix>.part` and atomically
//! renamed to `<name><suffix>` once the sink is finalized, so readers never
//! observe a torn file. Compressed sinks append their conventional suffix
//! and flush the codec to end-of-stream on close. Rotation closes the
//! current target (codec state included) and opens a fresh one.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use log::{debug, trace};
use xz2::stream::{Check, Stream};
use xz2::write::XzEncoder;

use crate::error::{CdnsError, Result};

pub const GZIP_SUFFIX: &str = ".gz";
pub const XZ_SUFFIX: &str = ".xz";
const PART_SUFFIX: &str = ".part";

/// LZMA2 preset matching the xz utils default.
const XZ_PRESET: u32 = 6;

/// Compression applied to the output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputCompression {
    Uncompressed,
    Gzip,
    Xz,
}

impl OutputCompression {
    /// File name suffix conventionally carried by this compression.
    pub fn suffix(&self) -> &'static str {
        match self {
            OutputCompression::Uncompressed => "",
            OutputCompression::Gzip => GZIP_SUFFIX,
            OutputCompression::Xz => XZ_SUFFIX,
        }
    }
}

/// Where output bytes go: a path the sink manages (with `.part` staging and
/// rename-on-close), or an already-open handle the caller obtained elsewhere.
#[derive(Debug)]
pub enum OutputDestination {
    Path(PathBuf),
    Handle(File),
}

impl From<&str> for OutputDestination {
    fn from(path: &str) -> Self {
        OutputDestination::Path(PathBuf::from(path))
    }
}

impl From<String> for OutputDestination {
    fn from(path: String) -> Self {
        OutputDestination::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for OutputDestination {
    fn from(path: PathBuf) -> Self {
        OutputDestination::Path(path)
    }
}

impl From<&std::path::Path> for OutputDestination {
    fn from(path: &std::path::Path) -> Self {
        OutputDestination::Path(path.to_path_buf())
    }
}

impl From<File> for OutputDestination {
    fn from(handle: File) -> Self {
        OutputDestination::Handle(handle)
    }
}

/// The file behind a sink, plus the rename performed when it completes.
struct FileSink {
    file: File,
    /// `(part, final)` path pair for path-backed targets
    paths: Option<(PathBuf, PathBuf)>,
}

impl FileSink {
    fn open(destination: OutputDestination, suffix: &str) -> Result<FileSink> {
        match destination {
            OutputDestination::Path(path) => {
                let mut final_path = path.into_os_string();
                final_path.push(suffix);
                let final_path = PathBuf::from(final_path);

                let mut part_path = final_path.clone().into_os_string();
                part_path.push(PART_SUFFIX);
                let part_path = PathBuf::from(part_path);

                trace!("opening output file {}", part_path.display());
                let file = File::create(&part_path)?;
                Ok(FileSink {
                    file,
                    paths: Some((part_path, final_path)),
                })
            }
            OutputDestination::Handle(file) => Ok(FileSink { file, paths: None }),
        }
    }

    /// Flush and, for path-backed targets, publish the completed file under
    /// its final name.
    fn close(mut self) -> Result<()> {
        self.file.flush()?;
        if let Some((part_path, final_path)) = self.paths.take() {
            std::fs::rename(&part_path, &final_path)?;
            debug!("finished output file {}", final_path.display());
        }
        Ok(())
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

enum SinkState {
    Plain(FileSink),
    Gzip(Box<GzEncoder<FileSink>>),
    Xz(Box<XzEncoder<FileSink>>),
    Closed,
}

/// Write-only byte sink with pluggable compression and output rotation.
pub(crate) struct OutputWriter {
    compression: OutputCompression,
    sink: SinkState,
}

impl OutputWriter {
    pub fn open(
        destination: OutputDestination,
        compression: OutputCompression,
    ) -> Result<OutputWriter> {
        Ok(OutputWriter {
            compression,
            sink: Self::open_sink(destination, compression)?,
        })
    }

    fn open_sink(destination: OutputDestination, compression: OutputCompression) -> Result<SinkState> {
        let file_sink = FileSink::open(destination, compression.suffix())?;
        match compression {
            OutputCompression::Uncompressed => Ok(SinkState::Plain(file_sink)),
            OutputCompression::Gzip => Ok(SinkState::Gzip(Box::new(GzEncoder::new(
                file_sink,
                Compression::default(),
            )))),
            OutputCompression::Xz => {
                let stream = Stream::new_easy_encoder(XZ_PRESET, Check::Crc64).map_err(|e| {
                    CdnsError::Compression(format!("couldn't initialize LZMA compression: {e}"))
                })?;
                Ok(SinkState::Xz(Box::new(XzEncoder::new_stream(
                    file_sink, stream,
                ))))
            }
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.sink {
            SinkState::Plain(sink) => sink.write_all(data).map_err(CdnsError::Io),
            SinkState::Gzip(encoder) => encoder
                .write_all(data)
                .map_err(|e| CdnsError::Compression(format!("GZIP write failed: {e}"))),
            SinkState::Xz(encoder) => encoder
                .write_all(data)
                .map_err(|e| CdnsError::Compression(format!("LZMA write failed: {e}"))),
            SinkState::Closed => Err(CdnsError::InvalidState(
                "write on a finalized output".to_string(),
            )),
        }
    }

    /// Finalize the current target: drive the codec to end-of-stream, flush,
    /// and rename the staged file. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.sink, SinkState::Closed) {
            SinkState::Plain(sink) => sink.close(),
            SinkState::Gzip(encoder) => encoder
                .finish()
                .map_err(|e| CdnsError::Compression(format!("GZIP finish failed: {e}")))?
                .close(),
            SinkState::Xz(encoder) => encoder
                .finish()
                .map_err(|e| CdnsError::Compression(format!("LZMA finish failed: {e}")))?
                .close(),
            SinkState::Closed => Ok(()),
        }
    }

    /// Close the current target and continue on a new one. Compression state
    /// is reset; the new target starts a fresh stream.
    pub fn rotate(&mut self, destination: OutputDestination) -> Result<()> {
        self.finish()?;
        self.sink = Self::open_sink(destination, self.compression)?;
        Ok(())
    }
}
