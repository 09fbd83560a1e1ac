use crate::decoder::CborDecoder;
use crate::error::CdnsError;
use crate::timestamp::{MICROS_PER_SEC, Timestamp};

use super::encode_with;

#[test]
fn test_ordering() {
    assert!(Timestamp::new(5, 100) < Timestamp::new(6, 0));
    assert!(Timestamp::new(5, 100) < Timestamp::new(5, 101));
    assert!(Timestamp::new(5, 100) <= Timestamp::new(5, 100));
    assert!(Timestamp::new(6, 0) > Timestamp::new(5, 999_999));
}

#[test]
fn test_time_offset_from() {
    let earliest = Timestamp::new(10, 500);
    let later = Timestamp::new(12, 250);

    let offset = later
        .time_offset_from(&earliest, 1000)
        .expect("offset");
    assert_eq!(offset, 2 * 1000 - 250);

    let negative = earliest
        .time_offset_from(&later, 1000)
        .expect("offset");
    assert_eq!(negative, -(2 * 1000 - 250));
}

#[test]
fn test_offset_round_trip() {
    let earliest = Timestamp::new(1650233100, 297413);
    let record = Timestamp::new(1650233142, 11);

    let offset = record
        .time_offset_from(&earliest, MICROS_PER_SEC)
        .expect("offset");
    let restored = earliest
        .advanced_by(offset, MICROS_PER_SEC)
        .expect("advance");
    assert_eq!(restored, record);
}

#[test]
fn test_zero_resolution_rejected() {
    let ts = Timestamp::new(1, 0);
    assert!(matches!(
        ts.time_offset_from(&Timestamp::default(), 0),
        Err(CdnsError::InvalidState(_))
    ));
    assert!(matches!(
        ts.advanced_by(5, 0),
        Err(CdnsError::InvalidState(_))
    ));
}

#[test]
fn test_advance_before_epoch_rejected() {
    let ts = Timestamp::new(1, 0);
    assert!(matches!(
        ts.advanced_by(-1001, 1000),
        Err(CdnsError::InvalidState(_))
    ));
}

#[test]
fn test_cbor_round_trip() {
    let ts = Timestamp::new(12, 1234);
    let bytes = encode_with(|enc| ts.write(enc).map(|_| ()));
    assert_eq!(hex::encode(&bytes), "820c1904d2");

    let mut dec = CborDecoder::new(bytes.as_slice());
    assert_eq!(Timestamp::read(&mut dec).expect("read"), ts);
}

#[test]
fn test_read_rejects_overlong_array() {
    let bytes = encode_with(|enc| {
        enc.write_array_start(3)?;
        enc.write_u64(1)?;
        enc.write_u64(2)?;
        enc.write_u64(3)?;
        Ok(())
    });
    let mut dec = CborDecoder::new(bytes.as_slice());
    assert!(matches!(
        Timestamp::read(&mut dec),
        Err(CdnsError::Decode(_))
    ));
}

#[test]
fn test_read_rejects_short_array() {
    let bytes = encode_with(|enc| {
        enc.write_array_start(1)?;
        enc.write_u64(1)?;
        Ok(())
    });
    let mut dec = CborDecoder::new(bytes.as_slice());
    assert!(matches!(
        Timestamp::read(&mut dec),
        Err(CdnsError::Decode(_))
    ));
}

#[test]
fn test_to_utc() {
    let ts = Timestamp::new(1650233100, 500_000);
    let datetime = ts.to_utc(MICROS_PER_SEC).expect("datetime");
    assert_eq!(datetime.timestamp(), 1650233100);
    assert_eq!(datetime.timestamp_subsec_millis(), 500);

    assert!(ts.to_utc(0).is_none());
}

#[test]
fn test_display() {
    assert_eq!(Timestamp::new(12, 1234).to_string(), "secs=12 ticks=1234");
}
