use crate::decoder::{CborDecoder, CborType};
use crate::error::CdnsError;

use super::encode_with;

fn decoder(bytes: &[u8]) -> CborDecoder<&[u8]> {
    CborDecoder::new(bytes)
}

#[test]
fn test_read_unsigned() {
    let bytes = hex::decode("0017181819ffff1b0000000100000000").expect("hex");
    let mut dec = decoder(&bytes);
    assert_eq!(dec.read_unsigned().expect("u64"), 0);
    assert_eq!(dec.read_unsigned().expect("u64"), 23);
    assert_eq!(dec.read_unsigned().expect("u64"), 24);
    assert_eq!(dec.read_unsigned().expect("u64"), 65535);
    assert_eq!(dec.read_unsigned().expect("u64"), u32::MAX as u64 + 1);
    assert!(matches!(dec.read_unsigned(), Err(CdnsError::EndOfInput)));
}

#[test]
fn test_read_negative_and_integer() {
    let bytes = hex::decode("2039109107").expect("hex");
    let mut dec = decoder(&bytes);
    assert_eq!(dec.read_negative().expect("i64"), -1);
    assert_eq!(dec.read_integer().expect("i64"), -4242);
    assert_eq!(dec.read_integer().expect("i64"), 7);
}

#[test]
fn test_read_unsigned_wrong_major_type() {
    let mut dec = decoder(&[0x20]);
    assert!(matches!(dec.read_unsigned(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_reserved_additional_info_rejected() {
    for byte in [0x1C, 0x1D, 0x1E, 0x1F] {
        let bytes = [byte];
        let mut dec = decoder(&bytes);
        let result = dec.read_unsigned();
        assert!(
            matches!(result, Err(CdnsError::Decode(_))),
            "additional info {byte:#x} should be rejected"
        );
    }
}

#[test]
fn test_read_bool() {
    let mut dec = decoder(&[0xF4, 0xF5, 0x00, 0x01]);
    assert!(!dec.read_bool().expect("bool"));
    assert!(dec.read_bool().expect("bool"));
    assert!(!dec.read_bool().expect("bool"));
    assert!(dec.read_bool().expect("bool"));

    let mut dec = decoder(&[0xF6]); // null isn't a bool
    assert!(matches!(dec.read_bool(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_read_strings() {
    let bytes = hex::decode("447465737465432d444e53").expect("hex");
    let mut dec = decoder(&bytes);
    assert_eq!(dec.read_bytestring().expect("bytes"), b"test");
    assert_eq!(dec.read_textstring().expect("text"), "C-DNS");
}

#[test]
fn test_read_indefinite_chunked_string() {
    // 0x5F (indef bytes) "te" "st" 0xFF
    let bytes = hex::decode("5f427465427374ff").expect("hex");
    let mut dec = decoder(&bytes);
    assert_eq!(dec.read_bytestring().expect("bytes"), b"test");
}

#[test]
fn test_indefinite_chunk_type_mismatch() {
    // text chunk inside an indefinite byte string
    let bytes = hex::decode("5f627465ff").expect("hex");
    let mut dec = decoder(&bytes);
    assert!(matches!(dec.read_bytestring(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_nested_indefinite_chunk_rejected() {
    let bytes = hex::decode("5f5fff").expect("hex");
    let mut dec = decoder(&bytes);
    assert!(matches!(dec.read_bytestring(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_invalid_utf8_text_rejected() {
    let mut dec = decoder(&[0x61, 0xFF]);
    assert!(matches!(dec.read_textstring(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_array_and_map_starts() {
    let mut dec = decoder(&[0x83, 0x9F, 0xA2, 0xBF]);
    assert_eq!(dec.read_array_start().expect("array"), (3, false));
    assert_eq!(dec.read_array_start().expect("array"), (0, true));
    assert_eq!(dec.read_map_start().expect("map"), (2, false));
    assert_eq!(dec.read_map_start().expect("map"), (0, true));
}

#[test]
fn test_read_array_iterates_definite_and_indefinite() {
    // [1, 2, 3] then indefinite [1, 2, 3]
    let bytes = hex::decode("830102039f010203ff").expect("hex");
    let mut dec = decoder(&bytes);

    for _ in 0..2 {
        let mut seen = Vec::new();
        dec.read_array(|dec| {
            seen.push(dec.read_unsigned()?);
            Ok(())
        })
        .expect("read_array");
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

#[test]
fn test_peek_type_does_not_consume() {
    let mut dec = decoder(&[0x17]);
    assert_eq!(dec.peek_type().expect("peek"), CborType::Unsigned);
    assert_eq!(dec.peek_type().expect("peek"), CborType::Unsigned);
    assert_eq!(dec.read_unsigned().expect("u64"), 23);
}

#[test]
fn test_peek_type_reports_break() {
    let mut dec = decoder(&[0xFF]);
    assert_eq!(dec.peek_type().expect("peek"), CborType::Break);
    dec.read_break().expect("break");
}

#[test]
fn test_read_break_on_non_break_fails() {
    let mut dec = decoder(&[0x00]);
    assert!(matches!(dec.read_break(), Err(CdnsError::Decode(_))));
}

#[test]
fn test_skip_item_scalars_and_strings() {
    let bytes = hex::decode("0139109144746573746474657374f5").expect("hex");
    let mut dec = decoder(&bytes);
    for _ in 0..5 {
        dec.skip_item().expect("skip");
    }
    assert!(matches!(dec.peek_type(), Err(CdnsError::EndOfInput)));
}

#[test]
fn test_skip_item_nested_containers() {
    // {0: [1, {2: "x"}], 1: indef[ 9, indef{3: 4}, "ab" ]} followed by 42
    let bytes = encode_with(|enc| {
        enc.write_map_start(2)?;
        enc.write_u8(0)?;
        enc.write_array_start(2)?;
        enc.write_u8(1)?;
        enc.write_map_start(1)?;
        enc.write_u8(2)?;
        enc.write_textstring("x")?;
        enc.write_u8(1)?;
        enc.write_indef_array_start()?;
        enc.write_u8(9)?;
        enc.write_indef_map_start()?;
        enc.write_u8(3)?;
        enc.write_u8(4)?;
        enc.write_break()?;
        enc.write_textstring("ab")?;
        enc.write_break()?;
        enc.write_u8(42)?;
        Ok(())
    });
    let mut dec = decoder(&bytes);
    dec.skip_item().expect("skip whole map");
    assert_eq!(dec.read_unsigned().expect("u64"), 42);
}

#[test]
fn test_cbor_round_trip_through_file() {
    // scalars, a definite array of them, then the same array indefinite
    let bytes = encode_with(|enc| {
        enc.write_u64(42)?;
        enc.write_i64(-4242)?;
        enc.write_bytestring(b"test")?;
        enc.write_array_start(3)?;
        enc.write_u64(42)?;
        enc.write_i64(-4242)?;
        enc.write_bytestring(b"test")?;
        enc.write_indef_array_start()?;
        enc.write_u64(42)?;
        enc.write_i64(-4242)?;
        enc.write_bytestring(b"test")?;
        enc.write_break()?;
        Ok(())
    });
    let mut dec = decoder(&bytes);

    assert_eq!(dec.read_unsigned().expect("u64"), 42);
    assert_eq!(dec.read_integer().expect("i64"), -4242);
    assert_eq!(dec.read_bytestring().expect("bytes"), b"test");

    let mut definite = Vec::new();
    dec.read_array(|dec| {
        match dec.peek_type()? {
            CborType::ByteString => definite.push(format!("{:?}", dec.read_bytestring()?)),
            _ => definite.push(format!("{}", dec.read_integer()?)),
        }
        Ok(())
    })
    .expect("definite array");

    let mut indefinite = Vec::new();
    dec.read_array(|dec| {
        match dec.peek_type()? {
            CborType::ByteString => indefinite.push(format!("{:?}", dec.read_bytestring()?)),
            _ => indefinite.push(format!("{}", dec.read_integer()?)),
        }
        Ok(())
    })
    .expect("indefinite array");

    // both framings carry the same logical sequence
    assert_eq!(definite, indefinite);
    assert_eq!(definite.len(), 3);
}
