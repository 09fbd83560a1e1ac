use std::net::IpAddr;

use crate::block::{CdnsBlock, ClassType};
use crate::block_read::CdnsBlockRead;
use crate::decoder::CborDecoder;
use crate::error::CdnsError;
use crate::file_preamble::BlockParameters;
use crate::format::{AddressEventType, qr_hints};
use crate::records::{
    GenericAddressEventCount, GenericMalformedMessage, GenericQueryResponse,
    GenericResourceRecord,
};
use crate::timestamp::Timestamp;

use super::encode_with;

fn ip(addr: &str) -> IpAddr {
    addr.parse().expect("a valid address")
}

fn read_back(block: &CdnsBlock, params: &[BlockParameters]) -> CdnsBlockRead {
    let bytes = encode_with(|enc| block.write(enc).map(|_| ()));
    let mut dec = CborDecoder::new(bytes.as_slice());
    CdnsBlockRead::read(&mut dec, params).expect("read block")
}

fn qr_at(secs: u64, client: &str) -> GenericQueryResponse {
    GenericQueryResponse {
        ts: Some(Timestamp::new(secs, 0)),
        client_ip: Some(ip(client)),
        ..Default::default()
    }
}

fn event(ae_type: AddressEventType, addr: &str) -> GenericAddressEventCount {
    GenericAddressEventCount {
        ae_type,
        ae_code: None,
        ae_transport_flags: None,
        ip_address: ip(addr),
        ae_count: 0,
    }
}

#[test]
fn test_query_response_round_trip() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    let record = GenericQueryResponse {
        ts: Some(Timestamp::new(1650233100, 297413)),
        client_ip: Some(ip("192.0.2.7")),
        client_port: Some(53004),
        transaction_id: Some(0xBEEF),
        server_ip: Some(ip("2001:db8::53")),
        server_port: Some(53),
        query_opcode: Some(0),
        query_ancount: Some(42),
        query_name: Some(b"\x07example\x03com\x00".to_vec()),
        query_classtype: Some(ClassType { rtype: 1, rclass: 1 }),
        response_delay: Some(-150),
        asn: Some("64496".to_string()),
        country_code: Some("CZ".to_string()),
        round_trip_time: Some(820),
        user_id: Some("291a2403-735f-4c94-917a-d9eeadb374a4".to_string()),
        ..Default::default()
    };
    assert!(!block.add_query_response(&record, None));
    assert_eq!(block.qr_count(), 1);

    let mut reread = read_back(&block, &[params]);
    let restored = reread
        .next_query_response()
        .expect("resolve")
        .expect("one record");
    assert_eq!(restored, record);
    assert!(reread.next_query_response().expect("resolve").is_none());
}

#[test]
fn test_extended_sections_round_trip() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    let question = GenericResourceRecord {
        name: b"\x04test\x00".to_vec(),
        classtype: ClassType { rtype: 2, rclass: 3 },
        ttl: None,
        rdata: None,
    };
    let answer = GenericResourceRecord {
        name: b"\x04test\x00".to_vec(),
        classtype: ClassType { rtype: 2, rclass: 3 },
        ttl: Some(128),
        rdata: Some(b"test_data".to_vec()),
    };

    let record = GenericQueryResponse {
        ts: Some(Timestamp::new(12, 12543)),
        query_questions: Some(vec![question.clone(), question.clone()]),
        query_additional: Some(vec![answer.clone()]),
        response_answers: Some(vec![answer.clone(), answer.clone()]),
        ..Default::default()
    };
    block.add_query_response(&record, None);

    let mut reread = read_back(&block, &[params]);
    let restored = reread
        .next_query_response()
        .expect("resolve")
        .expect("one record");
    assert_eq!(restored.query_questions, record.query_questions);
    assert_eq!(restored.query_additional, record.query_additional);
    assert_eq!(restored.response_answers, record.response_answers);
    assert_eq!(restored.response_authority, None);
}

#[test]
fn test_address_event_aggregation() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    for _ in 0..3 {
        block.add_address_event(&event(AddressEventType::IcmpTimeExceeded, "8.8.8.8"), None);
    }
    block.add_address_event(&event(AddressEventType::Icmpv6PacketTooBig, "8.8.8.8"), None);

    // four appends, two aggregation keys
    assert_eq!(block.aec_count(), 2);
    assert_eq!(block.item_count(), 2);

    let mut reread = read_back(&block, &[params]);
    let first = reread.next_address_event().expect("resolve").expect("aec");
    assert_eq!(first.ae_type, AddressEventType::IcmpTimeExceeded);
    assert_eq!(first.ae_count, 3);
    let second = reread.next_address_event().expect("resolve").expect("aec");
    assert_eq!(second.ae_type, AddressEventType::Icmpv6PacketTooBig);
    assert_eq!(second.ae_count, 1);
    assert!(reread.next_address_event().expect("resolve").is_none());
}

#[test]
fn test_address_event_supplied_count_is_ignored() {
    let mut block = CdnsBlock::new(BlockParameters::default(), 0);
    let mut observation = event(AddressEventType::TcpReset, "198.51.100.4");
    observation.ae_count = 500;

    block.add_address_event(&observation, None);
    block.add_address_event(&observation, None);

    let mut reread = read_back(&block, &[BlockParameters::default()]);
    let restored = reread.next_address_event().expect("resolve").expect("aec");
    assert_eq!(restored.ae_count, 2);
}

#[test]
fn test_address_event_dropped_when_hint_clear() {
    let mut params = BlockParameters::default();
    params.storage_parameters.storage_hints.other_data_hints = 0;
    let mut block = CdnsBlock::new(params, 0);

    assert!(!block.add_address_event(&event(AddressEventType::TcpReset, "8.8.8.8"), None));
    assert_eq!(block.item_count(), 0);
    assert!(block.is_empty());
}

#[test]
fn test_malformed_message_round_trip() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    let message = GenericMalformedMessage {
        ts: Some(Timestamp::new(12, 12543)),
        client_ip: Some(ip("8.8.8.8")),
        client_port: Some(56231),
        server_ip: Some(ip("198.51.100.250")),
        server_port: Some(53),
        mm_transport_flags: Some(crate::format::transport_flags::UDP),
        mm_payload: Some(b"\xde\xad\xbe\xef truncated".to_vec()),
    };
    block.add_malformed_message(&message, None);
    assert_eq!(block.mm_count(), 1);

    let mut reread = read_back(&block, &[params]);
    let restored = reread
        .next_malformed_message()
        .expect("resolve")
        .expect("one message");
    assert_eq!(restored, message);
}

#[test]
fn test_hint_clear_drops_field() {
    let mut params = BlockParameters::default();
    params.storage_parameters.storage_hints.query_response_hints =
        crate::file_preamble::DEFAULT_QR_HINTS & !qr_hints::CLIENT_PORT;
    let mut block = CdnsBlock::new(params.clone(), 0);

    let mut record = qr_at(100, "8.8.8.8");
    record.client_port = Some(53);
    block.add_query_response(&record, None);

    let mut reread = read_back(&block, &[params]);
    let restored = reread
        .next_query_response()
        .expect("resolve")
        .expect("one record");
    assert_eq!(restored.client_port, None);
    assert_eq!(restored.client_ip, record.client_ip);
}

#[test]
fn test_earliest_time_tracks_minimum() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    block.add_query_response(&qr_at(500, "192.0.2.1"), None);
    block.add_query_response(&qr_at(200, "192.0.2.2"), None);
    block.add_query_response(&qr_at(300, "192.0.2.3"), None);

    let mut reread = read_back(&block, &[params]);
    assert_eq!(reread.preamble().earliest_time, Timestamp::new(200, 0));

    // every record's absolute time survives the offset encoding
    let mut times = Vec::new();
    while let Some(record) = reread.next_query_response().expect("resolve") {
        times.push(record.ts.expect("ts").secs);
    }
    assert_eq!(times, vec![500, 200, 300]);
}

#[test]
fn test_fullness_is_advisory() {
    let mut params = BlockParameters::default();
    params.storage_parameters.max_block_items = 2;
    let mut block = CdnsBlock::new(params, 0);

    assert!(!block.add_query_response(&qr_at(1, "192.0.2.1"), None));
    assert!(block.add_query_response(&qr_at(2, "192.0.2.2"), None));
    // the limit doesn't reject further records
    assert!(block.add_query_response(&qr_at(3, "192.0.2.3"), None));
    assert_eq!(block.qr_count(), 3);
}

#[test]
fn test_set_block_parameters_requires_empty_block() {
    let mut block = CdnsBlock::new(BlockParameters::default(), 0);
    block.add_query_response(&qr_at(1, "192.0.2.1"), None);

    assert!(matches!(
        block.set_block_parameters(BlockParameters::default(), 1),
        Err(CdnsError::InvalidState(_))
    ));

    block.clear();
    block
        .set_block_parameters(BlockParameters::default(), 1)
        .expect("set on empty block");
    assert_eq!(block.block_parameters_index(), 1);
}

#[test]
fn test_clear_resets_state() {
    let mut block = CdnsBlock::new(BlockParameters::default(), 0);
    block.add_query_response(&qr_at(77, "192.0.2.1"), None);
    block.add_address_event(&event(AddressEventType::TcpReset, "8.8.8.8"), None);
    assert!(!block.is_empty());

    block.clear();
    assert!(block.is_empty());
    assert_eq!(block.item_count(), 0);

    // a fresh record re-pins the time base
    block.add_query_response(&qr_at(99, "192.0.2.1"), None);
    let reread = read_back(&block, &[BlockParameters::default()]);
    assert_eq!(reread.preamble().earliest_time, Timestamp::new(99, 0));
}

#[test]
fn test_tables_deduplicate_across_records() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    // same client, same qname, three records
    for secs in [1, 2, 3] {
        let mut record = qr_at(secs, "8.8.8.8");
        record.query_name = Some(b"\x07example\x03com\x00".to_vec());
        block.add_query_response(&record, None);
    }

    let reread = read_back(&block, &[params]);
    let summary = reread.to_string();
    assert!(summary.contains("IP address table items: 1"));
    assert!(summary.contains("NAME/RDATA table items: 1"));
    assert!(summary.contains("Query/response items: 3"));
}

#[test]
fn test_statistics_latest_copy_wins() {
    let params = BlockParameters::default();
    let mut block = CdnsBlock::new(params.clone(), 0);

    let mut stats = crate::block::BlockStatistics {
        processed_messages: Some(1),
        ..Default::default()
    };
    block.add_query_response(&qr_at(1, "192.0.2.1"), Some(&stats));
    stats.processed_messages = Some(2);
    block.add_query_response(&qr_at(2, "192.0.2.2"), Some(&stats));

    let reread = read_back(&block, &[params]);
    assert_eq!(
        reread.statistics().expect("statistics").processed_messages,
        Some(2)
    );
}

#[test]
fn test_block_parameters_index_out_of_range_on_read() {
    let params = BlockParameters::default();
    let mut filled = CdnsBlock::new(params.clone(), 4);
    filled.add_query_response(&qr_at(1, "192.0.2.1"), None);

    let bytes = encode_with(|enc| filled.write(enc).map(|_| ()));
    let mut dec = CborDecoder::new(bytes.as_slice());
    assert!(matches!(
        CdnsBlockRead::read(&mut dec, &[params]),
        Err(CdnsError::Decode(_))
    ));
}
