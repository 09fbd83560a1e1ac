use std::net::IpAddr;

use crate::block::BlockStatistics;
use crate::exporter::CdnsExporter;
use crate::file_preamble::{BlockParameters, FilePreamble};
use crate::records::GenericQueryResponse;
use crate::timestamp::Timestamp;
use crate::writer::OutputCompression;

use super::assert_no_part_files;

fn ip(addr: &str) -> IpAddr {
    addr.parse().expect("a valid address")
}

fn qr(secs: u64, client: &str) -> GenericQueryResponse {
    GenericQueryResponse {
        ts: Some(Timestamp::new(secs, 0)),
        client_ip: Some(ip(client)),
        ..Default::default()
    }
}

fn preamble_with_max_items(max_block_items: u64) -> FilePreamble {
    let mut params = BlockParameters::default();
    params.storage_parameters.max_block_items = max_block_items;
    FilePreamble::new(vec![params])
}

#[test]
fn test_new_exporter_buffers_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("empty.cdns");

    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        path.clone().into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");
    assert_eq!(exporter.block_item_count(), 0);
    assert_eq!(exporter.blocks_written_count(), 0);
    exporter.close().expect("close");

    // no blocks were written, so the published file carries no bytes
    assert_eq!(std::fs::read(&path).expect("read").len(), 0);
    assert_no_part_files(dir.path());
}

#[test]
fn test_file_starts_with_type_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("marker.cdns");

    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        path.clone().into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");
    exporter.buffer_query_response(&qr(1, "192.0.2.1"), None).expect("buffer");
    exporter.write_block().expect("write block");
    exporter.close().expect("close");

    let bytes = std::fs::read(&path).expect("read");
    assert_eq!(
        &bytes[..7],
        &[0x83, 0x65, b'C', b'-', b'D', b'N', b'S'],
        "outer array then the C-DNS text string"
    );
    assert_eq!(*bytes.last().expect("nonempty"), 0xFF, "blocks array break");
}

#[test]
fn test_append_reports_bytes_only_on_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut exporter = CdnsExporter::new(
        preamble_with_max_items(2),
        dir.path().join("rollover.cdns").into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");

    assert_eq!(
        exporter.buffer_query_response(&qr(1, "192.0.2.1"), None).expect("buffer"),
        0
    );
    // the second append fills the block and flushes it
    let written = exporter
        .buffer_query_response(&qr(2, "192.0.2.2"), None)
        .expect("buffer");
    assert!(written > 0);
    assert_eq!(exporter.block_item_count(), 0);
    assert_eq!(exporter.blocks_written_count(), 1);

    exporter.buffer_query_response(&qr(3, "192.0.2.3"), None).expect("buffer");
    assert_eq!(exporter.block_item_count(), 1);
}

#[test]
fn test_explicit_write_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        dir.path().join("explicit.cdns").into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");

    let stats = BlockStatistics {
        processed_messages: Some(1),
        ..Default::default()
    };
    assert_eq!(
        exporter
            .buffer_query_response(&qr(12, "8.8.8.8"), Some(&stats))
            .expect("buffer"),
        0
    );
    assert_eq!(exporter.block_item_count(), 1);

    let written = exporter.write_block().expect("write block");
    assert!(written > 0);
    assert_eq!(exporter.block_item_count(), 0);

    // an empty block writes nothing
    assert_eq!(exporter.write_block().expect("write block"), 0);
}

#[test]
fn test_rotation_completes_both_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first.cdns");
    let second = dir.path().join("second.cdns");

    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        first.clone().into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");

    exporter.buffer_query_response(&qr(1, "192.0.2.1"), None).expect("buffer");
    let written = exporter
        .rotate_output(second.clone().into(), true)
        .expect("rotate");
    assert!(written > 0);
    assert_eq!(exporter.blocks_written_count(), 0);

    exporter.buffer_query_response(&qr(2, "192.0.2.2"), None).expect("buffer");
    exporter.write_block().expect("write block");
    exporter.close().expect("close");

    assert_no_part_files(dir.path());
    for path in [first, second] {
        let mut reader =
            crate::reader::CdnsReader::new(std::fs::File::open(&path).expect("open")).expect("reader");
        let block = reader.read_block().expect("read").expect("one block");
        assert_eq!(block.qr_count(), 1);
        assert!(reader.read_block().expect("read").is_none());
    }
}

#[test]
fn test_multiple_block_parameters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("multi.cdns");

    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        path.clone().into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");

    let mut params = BlockParameters::default();
    params.storage_parameters.ticks_per_second = 1000;
    let index = exporter.add_block_parameters(params);
    assert_eq!(index, 1);

    assert!(exporter.set_active_block_parameters(2).is_err());
    exporter.set_active_block_parameters(index).expect("set active");
    assert_eq!(exporter.active_block_parameters_index(), 1);
    assert_eq!(
        exporter
            .active_block_parameters()
            .expect("params")
            .storage_parameters
            .ticks_per_second,
        1000
    );

    // the block in progress still uses the old parameters; the new ones
    // take over after it is written
    exporter.buffer_query_response(&qr(5, "192.0.2.1"), None).expect("buffer");
    exporter.write_block().expect("write block");
    exporter.buffer_query_response(&qr(6, "192.0.2.2"), None).expect("buffer");
    exporter.write_block().expect("write block");
    exporter.close().expect("close");

    let mut reader =
        crate::reader::CdnsReader::new(std::fs::File::open(&path).expect("open")).expect("reader");
    let first = reader.read_block().expect("read").expect("block");
    assert_eq!(first.preamble().block_parameters_index, Some(0));
    let second = reader.read_block().expect("read").expect("block");
    assert_eq!(second.preamble().block_parameters_index, Some(1));
    assert_eq!(
        second.block_parameters().storage_parameters.ticks_per_second,
        1000
    );
}

#[test]
fn test_drop_terminates_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dropped.cdns");

    {
        let mut exporter = CdnsExporter::new(
            FilePreamble::default(),
            path.clone().into(),
            OutputCompression::Uncompressed,
        )
        .expect("exporter");
        exporter.buffer_query_response(&qr(1, "192.0.2.1"), None).expect("buffer");
        exporter.write_block().expect("write block");
        // no close(): Drop finalizes
    }

    assert_no_part_files(dir.path());
    let mut reader =
        crate::reader::CdnsReader::new(std::fs::File::open(&path).expect("open")).expect("reader");
    assert!(reader.read_block().expect("read").is_some());
    assert!(reader.read_block().expect("read").is_none());
}

#[test]
fn test_export_external_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("external.cdns");

    let mut exporter = CdnsExporter::new(
        FilePreamble::default(),
        path.clone().into(),
        OutputCompression::Uncompressed,
    )
    .expect("exporter");

    let mut block = crate::block::CdnsBlock::new(BlockParameters::default(), 0);
    block.add_query_response(&qr(9, "203.0.113.9"), None);
    assert!(exporter.export_block(&block).expect("export") > 0);
    assert_eq!(exporter.blocks_written_count(), 1);
    exporter.close().expect("close");

    let mut reader =
        crate::reader::CdnsReader::new(std::fs::File::open(&path).expect("open")).expect("reader");
    let reread = reader.read_block().expect("read").expect("block");
    assert_eq!(reread.qr_count(), 1);
}
