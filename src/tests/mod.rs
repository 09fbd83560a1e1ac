mod block;
mod decoder;
mod encoder;
mod exporter;
mod file_preamble;
mod timestamp;

use std::path::Path;

use crate::encoder::CborEncoder;
use crate::writer::OutputCompression;

/// Run `build` against an encoder writing to a temp file and hand back the
/// bytes it produced.
pub(crate) fn encode_with<F>(build: F) -> Vec<u8>
where
    F: FnOnce(&mut CborEncoder) -> crate::Result<()>,
{
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("encoded.cbor");
    let mut enc = CborEncoder::new(path.clone().into(), OutputCompression::Uncompressed)
        .expect("open encoder");
    build(&mut enc).expect("encode");
    enc.finish().expect("finish encoder");
    std::fs::read(&path).expect("read encoded bytes")
}

pub(crate) fn assert_no_part_files(dir: &Path) {
    for entry in std::fs::read_dir(dir).expect("read_dir") {
        let name = entry.expect("dir entry").file_name();
        assert!(
            !name.to_string_lossy().ends_with(".part"),
            "leftover staging file: {name:?}"
        );
    }
}
