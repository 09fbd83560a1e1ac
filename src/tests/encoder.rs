use super::encode_with;

#[test]
fn test_minimal_unsigned_encodings() {
    let bytes = encode_with(|enc| {
        assert_eq!(enc.write_u64(0)?, 1);
        assert_eq!(enc.write_u64(23)?, 1);
        assert_eq!(enc.write_u64(24)?, 2);
        assert_eq!(enc.write_u64(255)?, 2);
        assert_eq!(enc.write_u64(256)?, 3);
        assert_eq!(enc.write_u64(65535)?, 3);
        assert_eq!(enc.write_u64(65536)?, 5);
        assert_eq!(enc.write_u64(u32::MAX as u64)?, 5);
        assert_eq!(enc.write_u64(u32::MAX as u64 + 1)?, 9);
        Ok(())
    });
    assert_eq!(
        hex::encode(&bytes),
        "0017181818ff19010019ffff1a000100001affffffff1b0000000100000000"
    );
}

#[test]
fn test_small_widths_use_minimal_form_too() {
    let bytes = encode_with(|enc| {
        enc.write_u8(5)?;
        enc.write_u16(42)?;
        enc.write_u32(1000)?;
        Ok(())
    });
    assert_eq!(hex::encode(&bytes), "05182a1903e8");
}

#[test]
fn test_negative_encodings() {
    let bytes = encode_with(|enc| {
        enc.write_i64(-1)?;
        enc.write_i64(-24)?;
        enc.write_i64(-25)?;
        enc.write_i64(-4242)?;
        enc.write_i64(7)?;
        Ok(())
    });
    // -4242 encodes 4241 = 0x1091 under major type 1
    assert_eq!(hex::encode(&bytes), "2037381839109107");
}

#[test]
fn test_bool_and_break() {
    let bytes = encode_with(|enc| {
        enc.write_bool(false)?;
        enc.write_bool(true)?;
        enc.write_break()?;
        Ok(())
    });
    assert_eq!(bytes, vec![0xF4, 0xF5, 0xFF]);
}

#[test]
fn test_strings() {
    let bytes = encode_with(|enc| {
        enc.write_bytestring(b"test")?;
        enc.write_textstring("C-DNS")?;
        Ok(())
    });
    assert_eq!(hex::encode(&bytes), "447465737465432d444e53");
}

#[test]
fn test_containers() {
    let bytes = encode_with(|enc| {
        enc.write_array_start(3)?;
        enc.write_map_start(2)?;
        enc.write_indef_array_start()?;
        enc.write_indef_map_start()?;
        enc.write_break()?;
        enc.write_break()?;
        Ok(())
    });
    assert_eq!(bytes, vec![0x83, 0xA2, 0x9F, 0xBF, 0xFF, 0xFF]);
}

#[test]
fn test_long_string_segments_across_buffer_flushes() {
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let bytes = encode_with(|enc| {
        let written = enc.write_bytestring(&payload)?;
        assert_eq!(written, 3 + payload.len());
        Ok(())
    });
    assert_eq!(bytes.len(), 3 + payload.len());
    assert_eq!(&bytes[..3], &[0x59, 0x13, 0x88]);
    assert_eq!(&bytes[3..], payload.as_slice());
}

#[test]
fn test_file_type_marker_bytes() {
    let bytes = encode_with(|enc| {
        enc.write_array_start(3)?;
        enc.write_textstring(crate::FILE_TYPE_ID)?;
        Ok(())
    });
    assert_eq!(bytes, vec![0x83, 0x65, b'C', b'-', b'D', b'N', b'S']);
}
