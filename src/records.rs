//! Caller-facing record structures.
//!
//! These are the shapes records take on their way into a block (before hint
//! filtering and table interning) and on their way back out of one (after
//! rehydration). Every optional wire field is a present-or-absent `Option`;
//! indices never appear here, only resolved values.

use std::net::IpAddr;

use crate::block::ClassType;
use crate::format::{AddressEventType, QueryResponseType};
use crate::timestamp::Timestamp;

/// One question or resource record inside an extended section.
///
/// `ttl` and `rdata` are unused for questions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericResourceRecord {
    pub name: Vec<u8>,
    pub classtype: ClassType,
    pub ttl: Option<u32>,
    pub rdata: Option<Vec<u8>>,
}

/// One captured query/response pair, fully denormalized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenericQueryResponse {
    pub ts: Option<Timestamp>,
    pub client_ip: Option<IpAddr>,
    pub client_port: Option<u16>,
    pub transaction_id: Option<u16>,

    // query/response signature
    pub server_ip: Option<IpAddr>,
    pub server_port: Option<u16>,
    pub qr_transport_flags: Option<u8>,
    pub qr_type: Option<QueryResponseType>,
    pub qr_sig_flags: Option<u8>,
    pub query_opcode: Option<u8>,
    pub qr_dns_flags: Option<u16>,
    pub query_rcode: Option<u16>,
    pub query_classtype: Option<ClassType>,
    pub query_qdcount: Option<u16>,
    pub query_ancount: Option<u16>,
    pub query_nscount: Option<u16>,
    pub query_arcount: Option<u16>,
    pub query_edns_version: Option<u8>,
    pub query_udp_size: Option<u16>,
    pub query_opt_rdata: Option<Vec<u8>>,
    pub response_rcode: Option<u16>,

    pub client_hoplimit: Option<u8>,
    pub response_delay: Option<i64>,
    pub query_name: Option<Vec<u8>>,
    pub query_size: Option<u64>,
    pub response_size: Option<u64>,

    // response processing data
    pub bailiwick: Option<Vec<u8>>,
    pub processing_flags: Option<u8>,

    // extended sections
    pub query_questions: Option<Vec<GenericResourceRecord>>,
    pub query_answers: Option<Vec<GenericResourceRecord>>,
    pub query_authority: Option<Vec<GenericResourceRecord>>,
    pub query_additional: Option<Vec<GenericResourceRecord>>,
    pub response_questions: Option<Vec<GenericResourceRecord>>,
    pub response_answers: Option<Vec<GenericResourceRecord>>,
    pub response_authority: Option<Vec<GenericResourceRecord>>,
    pub response_additional: Option<Vec<GenericResourceRecord>>,

    // implementation-specific extensions
    /// Autonomous system number for the client IP address
    pub asn: Option<String>,
    /// Country code for the client IP address
    pub country_code: Option<String>,
    /// Estimated RTT of the TCP connection, in ticks
    pub round_trip_time: Option<i64>,
    /// Opaque user identifier attached by the collector
    pub user_id: Option<String>,
}

/// One address event observation. On append the count is ignored and the
/// per-(type, code, transport, address) aggregate is bumped by one; on read
/// it carries the aggregated total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericAddressEventCount {
    pub ae_type: AddressEventType,
    pub ae_code: Option<u8>,
    pub ae_transport_flags: Option<u8>,
    pub ip_address: IpAddr,
    pub ae_count: u64,
}

/// One malformed message with its opaque payload data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenericMalformedMessage {
    pub ts: Option<Timestamp>,
    pub client_ip: Option<IpAddr>,
    pub client_port: Option<u16>,

    // malformed message data
    pub server_ip: Option<IpAddr>,
    pub server_port: Option<u16>,
    pub mm_transport_flags: Option<u8>,
    pub mm_payload: Option<Vec<u8>>,
}
