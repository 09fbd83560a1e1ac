use crate::decoder::CborDecoder;
use crate::error::CdnsError;
use crate::file_preamble::{
    BlockParameters, CollectionParameters, DEFAULT_MAX_BLOCK_ITEMS, DEFAULT_OPCODES,
    DEFAULT_QR_HINTS, DEFAULT_TICKS_PER_SECOND, FilePreamble, StorageParameters, VERSION_MAJOR,
    VERSION_MINOR, VERSION_PRIVATE,
};

use super::encode_with;

#[test]
fn test_defaults() {
    let preamble = FilePreamble::default();
    assert_eq!(preamble.major_format_version, VERSION_MAJOR);
    assert_eq!(preamble.minor_format_version, VERSION_MINOR);
    assert_eq!(preamble.private_version, Some(VERSION_PRIVATE));
    assert_eq!(preamble.block_parameters_count(), 1);

    let storage = &preamble.block_parameters(0).expect("params").storage_parameters;
    assert_eq!(storage.ticks_per_second, DEFAULT_TICKS_PER_SECOND);
    assert_eq!(storage.max_block_items, DEFAULT_MAX_BLOCK_ITEMS);
    assert_eq!(storage.opcodes, DEFAULT_OPCODES);
    assert_eq!(storage.storage_hints.query_response_hints, DEFAULT_QR_HINTS);
}

#[test]
fn test_new_never_leaves_parameters_empty() {
    let preamble = FilePreamble::new(Vec::new());
    assert_eq!(preamble.block_parameters_count(), 1);
}

#[test]
fn test_add_and_get_block_parameters() {
    let mut preamble = FilePreamble::default();
    let mut params = BlockParameters::default();
    params.storage_parameters.max_block_items = 77;

    let index = preamble.add_block_parameters(params);
    assert_eq!(index, 1);
    assert_eq!(
        preamble
            .block_parameters(index)
            .expect("params")
            .storage_parameters
            .max_block_items,
        77
    );
    assert!(matches!(
        preamble.block_parameters(2),
        Err(CdnsError::IndexRange(_))
    ));
}

#[test]
fn test_cbor_round_trip() {
    let mut preamble = FilePreamble::default();
    let mut params = BlockParameters {
        storage_parameters: StorageParameters {
            ticks_per_second: 1000,
            max_block_items: 50,
            storage_flags: Some(0b101),
            sampling_method: Some("1:10".to_string()),
            ..Default::default()
        },
        collection_parameters: Some(CollectionParameters {
            query_timeout: Some(5),
            promisc: Some(true),
            interfaces: vec!["eth0".to_string()],
            server_address: vec![vec![192, 0, 2, 1]],
            vlan_ids: vec![17],
            generator_id: Some("unit test".to_string()),
            ..Default::default()
        }),
    };
    params.storage_parameters.storage_hints.rr_hints = 0b01;
    preamble.add_block_parameters(params);

    let bytes = encode_with(|enc| preamble.write(enc).map(|_| ()));
    let mut dec = CborDecoder::new(bytes.as_slice());
    let reread = FilePreamble::read(&mut dec).expect("read");
    assert_eq!(reread, preamble);
}

#[test]
fn test_read_skips_unknown_keys() {
    let bytes = encode_with(|enc| {
        enc.write_map_start(4)?;
        enc.write_i64(0)?; // major version
        enc.write_u8(1)?;
        enc.write_i64(1)?; // minor version
        enc.write_u8(0)?;
        enc.write_i64(3)?; // block parameters
        enc.write_array_start(1)?;
        BlockParameters::default().write(enc)?;
        enc.write_i64(9)?; // unknown key with a nested value
        enc.write_array_start(2)?;
        enc.write_textstring("future")?;
        enc.write_u64(9000)?;
        Ok(())
    });
    let mut dec = CborDecoder::new(bytes.as_slice());
    let preamble = FilePreamble::read(&mut dec).expect("read");
    assert_eq!(preamble.private_version, None);
    assert_eq!(preamble.block_parameters_count(), 1);
}

#[test]
fn test_read_missing_mandatory_key_fails() {
    // no block parameters array at all
    let bytes = encode_with(|enc| {
        enc.write_map_start(2)?;
        enc.write_i64(0)?;
        enc.write_u8(1)?;
        enc.write_i64(1)?;
        enc.write_u8(0)?;
        Ok(())
    });
    let mut dec = CborDecoder::new(bytes.as_slice());
    assert!(matches!(
        FilePreamble::read(&mut dec),
        Err(CdnsError::Decode(_))
    ));
}

#[test]
fn test_read_empty_parameters_array_fails() {
    let bytes = encode_with(|enc| {
        enc.write_map_start(3)?;
        enc.write_i64(0)?;
        enc.write_u8(1)?;
        enc.write_i64(1)?;
        enc.write_u8(0)?;
        enc.write_i64(3)?;
        enc.write_array_start(0)?;
        Ok(())
    });
    let mut dec = CborDecoder::new(bytes.as_slice());
    assert!(matches!(
        FilePreamble::read(&mut dec),
        Err(CdnsError::Decode(_))
    ));
}

#[test]
fn test_json_profile_round_trip() {
    let mut params = BlockParameters::default();
    params.storage_parameters.ticks_per_second = 1000;
    params.storage_parameters.anonymization_method = Some("prefix".to_string());

    let json = serde_json::to_string(&params).expect("serialize");
    let reread: BlockParameters = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(reread, params);

    // sparse profiles fall back to defaults field by field
    let sparse: StorageParameters =
        serde_json::from_str(r#"{"max_block_items": 123}"#).expect("deserialize");
    assert_eq!(sparse.max_block_items, 123);
    assert_eq!(sparse.ticks_per_second, DEFAULT_TICKS_PER_SECOND);
}

#[test]
fn test_display_lists_parameters() {
    let text = FilePreamble::default().to_string();
    assert!(text.contains("Major format version: 1"));
    assert!(text.contains("Ticks per second: 1000000"));
}
