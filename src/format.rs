//! Wire-format constants for C-DNS (RFC 8618).
//!
//! Every map in a C-DNS file is keyed by small integers; the modules below
//! name those keys per map. Keys are `i64` so decode paths can match them
//! straight off [`crate::decoder::CborDecoder::read_integer`], including the
//! negative implementation-specific keys on query/response records.

use crate::error::CdnsError;

/// File preamble map keys.
pub mod file_preamble_key {
    pub const MAJOR_FORMAT_VERSION: i64 = 0;
    pub const MINOR_FORMAT_VERSION: i64 = 1;
    pub const PRIVATE_VERSION: i64 = 2;
    pub const BLOCK_PARAMETERS: i64 = 3;
}

/// Block parameters map keys.
pub mod block_parameters_key {
    pub const STORAGE_PARAMETERS: i64 = 0;
    pub const COLLECTION_PARAMETERS: i64 = 1;
}

/// Storage parameters map keys.
pub mod storage_parameters_key {
    pub const TICKS_PER_SECOND: i64 = 0;
    pub const MAX_BLOCK_ITEMS: i64 = 1;
    pub const STORAGE_HINTS: i64 = 2;
    pub const OPCODES: i64 = 3;
    pub const RR_TYPES: i64 = 4;
    pub const STORAGE_FLAGS: i64 = 5;
    pub const CLIENT_ADDRESS_PREFIX_IPV4: i64 = 6;
    pub const CLIENT_ADDRESS_PREFIX_IPV6: i64 = 7;
    pub const SERVER_ADDRESS_PREFIX_IPV4: i64 = 8;
    pub const SERVER_ADDRESS_PREFIX_IPV6: i64 = 9;
    pub const SAMPLING_METHOD: i64 = 10;
    pub const ANONYMIZATION_METHOD: i64 = 11;
}

/// Collection parameters map keys.
pub mod collection_parameters_key {
    pub const QUERY_TIMEOUT: i64 = 0;
    pub const SKEW_TIMEOUT: i64 = 1;
    pub const SNAPLEN: i64 = 2;
    pub const PROMISC: i64 = 3;
    pub const INTERFACES: i64 = 4;
    pub const SERVER_ADDRESS: i64 = 5;
    pub const VLAN_IDS: i64 = 6;
    pub const FILTER: i64 = 7;
    pub const GENERATOR_ID: i64 = 8;
    pub const HOST_ID: i64 = 9;
}

/// Storage hints map keys.
pub mod storage_hints_key {
    pub const QUERY_RESPONSE_HINTS: i64 = 0;
    pub const QUERY_RESPONSE_SIGNATURE_HINTS: i64 = 1;
    pub const RR_HINTS: i64 = 2;
    pub const OTHER_DATA_HINTS: i64 = 3;
}

/// Block map keys.
pub mod block_key {
    pub const BLOCK_PREAMBLE: i64 = 0;
    pub const BLOCK_STATISTICS: i64 = 1;
    pub const BLOCK_TABLES: i64 = 2;
    pub const QUERY_RESPONSES: i64 = 3;
    pub const ADDRESS_EVENT_COUNTS: i64 = 4;
    pub const MALFORMED_MESSAGES: i64 = 5;
}

/// Block preamble map keys.
pub mod block_preamble_key {
    pub const EARLIEST_TIME: i64 = 0;
    pub const BLOCK_PARAMETERS_INDEX: i64 = 1;
}

/// Block statistics map keys.
pub mod block_statistics_key {
    pub const PROCESSED_MESSAGES: i64 = 0;
    pub const QR_DATA_ITEMS: i64 = 1;
    pub const UNMATCHED_QUERIES: i64 = 2;
    pub const UNMATCHED_RESPONSES: i64 = 3;
    pub const DISCARDED_OPCODE: i64 = 4;
    pub const MALFORMED_ITEMS: i64 = 5;
}

/// Block tables map keys, in canonical emit order.
pub mod block_tables_key {
    pub const IP_ADDRESS: i64 = 0;
    pub const CLASSTYPE: i64 = 1;
    pub const NAME_RDATA: i64 = 2;
    pub const QR_SIG: i64 = 3;
    pub const QLIST: i64 = 4;
    pub const QRR: i64 = 5;
    pub const RRLIST: i64 = 6;
    pub const RR: i64 = 7;
    pub const MALFORMED_MESSAGE_DATA: i64 = 8;
}

/// ClassType map keys.
pub mod classtype_key {
    pub const TYPE: i64 = 0;
    pub const CLASS: i64 = 1;
}

/// Query/response signature map keys.
pub mod qr_signature_key {
    pub const SERVER_ADDRESS_INDEX: i64 = 0;
    pub const SERVER_PORT: i64 = 1;
    pub const QR_TRANSPORT_FLAGS: i64 = 2;
    pub const QR_TYPE: i64 = 3;
    pub const QR_SIG_FLAGS: i64 = 4;
    pub const QUERY_OPCODE: i64 = 5;
    pub const QR_DNS_FLAGS: i64 = 6;
    pub const QUERY_RCODE: i64 = 7;
    pub const QUERY_CLASSTYPE_INDEX: i64 = 8;
    pub const QUERY_QDCOUNT: i64 = 9;
    pub const QUERY_ANCOUNT: i64 = 10;
    pub const QUERY_NSCOUNT: i64 = 11;
    pub const QUERY_ARCOUNT: i64 = 12;
    pub const QUERY_EDNS_VERSION: i64 = 13;
    pub const QUERY_UDP_SIZE: i64 = 14;
    pub const QUERY_OPT_RDATA_INDEX: i64 = 15;
    pub const RESPONSE_RCODE: i64 = 16;
}

/// Question map keys.
pub mod question_key {
    pub const NAME_INDEX: i64 = 0;
    pub const CLASSTYPE_INDEX: i64 = 1;
}

/// Resource record map keys.
pub mod rr_key {
    pub const NAME_INDEX: i64 = 0;
    pub const CLASSTYPE_INDEX: i64 = 1;
    pub const TTL: i64 = 2;
    pub const RDATA_INDEX: i64 = 3;
}

/// Malformed message data map keys.
pub mod malformed_message_data_key {
    pub const SERVER_ADDRESS_INDEX: i64 = 0;
    pub const SERVER_PORT: i64 = 1;
    pub const MM_TRANSPORT_FLAGS: i64 = 2;
    pub const MM_PAYLOAD: i64 = 3;
}

/// Query/response record map keys.
///
/// The negative keys are implementation-specific extensions.
pub mod query_response_key {
    pub const TIME_OFFSET: i64 = 0;
    pub const CLIENT_ADDRESS_INDEX: i64 = 1;
    pub const CLIENT_PORT: i64 = 2;
    pub const TRANSACTION_ID: i64 = 3;
    pub const QR_SIGNATURE_INDEX: i64 = 4;
    pub const CLIENT_HOPLIMIT: i64 = 5;
    pub const RESPONSE_DELAY: i64 = 6;
    pub const QUERY_NAME_INDEX: i64 = 7;
    pub const QUERY_SIZE: i64 = 8;
    pub const RESPONSE_SIZE: i64 = 9;
    pub const RESPONSE_PROCESSING_DATA: i64 = 10;
    pub const QUERY_EXTENDED: i64 = 11;
    pub const RESPONSE_EXTENDED: i64 = 12;
    /// Autonomous system number for the client IP address
    pub const ASN: i64 = -1;
    /// Country code for the client IP address
    pub const COUNTRY_CODE: i64 = -2;
    /// Estimated RTT of the TCP connection
    pub const ROUND_TRIP_TIME: i64 = -3;
    /// Opaque user identifier attached by the collector
    pub const USER_ID: i64 = -4;
}

/// Response processing data map keys.
pub mod response_processing_data_key {
    pub const BAILIWICK_INDEX: i64 = 0;
    pub const PROCESSING_FLAGS: i64 = 1;
}

/// Query/response extended-section map keys.
pub mod qr_extended_key {
    pub const QUESTION_INDEX: i64 = 0;
    pub const ANSWER_INDEX: i64 = 1;
    pub const AUTHORITY_INDEX: i64 = 2;
    pub const ADDITIONAL_INDEX: i64 = 3;
}

/// Address event count map keys.
pub mod address_event_count_key {
    pub const AE_TYPE: i64 = 0;
    pub const AE_CODE: i64 = 1;
    pub const AE_ADDRESS_INDEX: i64 = 2;
    pub const AE_TRANSPORT_FLAGS: i64 = 3;
    pub const AE_COUNT: i64 = 4;
}

/// Malformed message map keys.
pub mod malformed_message_key {
    pub const TIME_OFFSET: i64 = 0;
    pub const CLIENT_ADDRESS_INDEX: i64 = 1;
    pub const CLIENT_PORT: i64 = 2;
    pub const MESSAGE_DATA_INDEX: i64 = 3;
}

/// Query/response hint bits. A clear bit drops the field before storage.
pub mod qr_hints {
    pub const TIME_OFFSET: u32 = 1 << 0;
    pub const CLIENT_ADDRESS_INDEX: u32 = 1 << 1;
    pub const CLIENT_PORT: u32 = 1 << 2;
    pub const TRANSACTION_ID: u32 = 1 << 3;
    pub const QR_SIGNATURE_INDEX: u32 = 1 << 4;
    pub const CLIENT_HOPLIMIT: u32 = 1 << 5;
    pub const RESPONSE_DELAY: u32 = 1 << 6;
    pub const QUERY_NAME_INDEX: u32 = 1 << 7;
    pub const QUERY_SIZE: u32 = 1 << 8;
    pub const RESPONSE_SIZE: u32 = 1 << 9;
    pub const RESPONSE_PROCESSING_DATA: u32 = 1 << 10;
    pub const QUERY_QUESTION_SECTIONS: u32 = 1 << 11;
    pub const QUERY_ANSWER_SECTIONS: u32 = 1 << 12;
    pub const QUERY_AUTHORITY_SECTIONS: u32 = 1 << 13;
    pub const QUERY_ADDITIONAL_SECTIONS: u32 = 1 << 14;
    pub const RESPONSE_ANSWER_SECTIONS: u32 = 1 << 15;
    pub const RESPONSE_AUTHORITY_SECTIONS: u32 = 1 << 16;
    pub const RESPONSE_ADDITIONAL_SECTIONS: u32 = 1 << 17;
}

/// Query/response signature hint bits.
pub mod qr_sig_hints {
    pub const SERVER_ADDRESS_INDEX: u32 = 1 << 0;
    pub const SERVER_PORT: u32 = 1 << 1;
    pub const QR_TRANSPORT_FLAGS: u32 = 1 << 2;
    pub const QR_TYPE: u32 = 1 << 3;
    pub const QR_SIG_FLAGS: u32 = 1 << 4;
    pub const QUERY_OPCODE: u32 = 1 << 5;
    pub const QR_DNS_FLAGS: u32 = 1 << 6;
    pub const QUERY_RCODE: u32 = 1 << 7;
    pub const QUERY_CLASSTYPE_INDEX: u32 = 1 << 8;
    pub const QUERY_QDCOUNT: u32 = 1 << 9;
    pub const QUERY_ANCOUNT: u32 = 1 << 10;
    pub const QUERY_NSCOUNT: u32 = 1 << 11;
    pub const QUERY_ARCOUNT: u32 = 1 << 12;
    pub const QUERY_EDNS_VERSION: u32 = 1 << 13;
    pub const QUERY_UDP_SIZE: u32 = 1 << 14;
    pub const QUERY_OPT_RDATA_INDEX: u32 = 1 << 15;
    pub const RESPONSE_RCODE: u32 = 1 << 16;
}

/// Resource record hint bits.
pub mod rr_hints {
    pub const TTL: u8 = 1 << 0;
    pub const RDATA_INDEX: u8 = 1 << 1;
}

/// Other-data hint bits. These gate whole record kinds, not single fields.
pub mod other_data_hints {
    pub const MALFORMED_MESSAGES: u8 = 1 << 0;
    pub const ADDRESS_EVENT_COUNTS: u8 = 1 << 1;
}

/// Storage flag bits.
pub mod storage_flags {
    pub const ANONYMIZED_DATA: u8 = 1 << 0;
    pub const SAMPLED_DATA: u8 = 1 << 1;
    pub const NORMALIZED_DATA: u8 = 1 << 2;
}

/// Transport flag bits shared by signatures, malformed messages and address
/// events. Bit 0 is the IP version (set = IPv6), bits 1-4 the transport.
pub mod transport_flags {
    pub const IP_VERSION: u8 = 1 << 0;

    pub const TRANSPORT_MASK: u8 = 15 << 1;
    pub const UDP: u8 = 0 << 1;
    pub const TCP: u8 = 1 << 1;
    pub const TLS: u8 = 2 << 1;
    pub const DTLS: u8 = 3 << 1;
    pub const HTTPS: u8 = 4 << 1;
    pub const NON_STANDARD: u8 = 15 << 1;

    pub const QUERY_TRAILING_DATA: u8 = 1 << 5;
}

/// Query/response signature flag bits.
pub mod qr_flags {
    pub const HAS_QUERY: u8 = 1 << 0;
    pub const HAS_RESPONSE: u8 = 1 << 1;
    pub const QUERY_HAS_OPT: u8 = 1 << 2;
    pub const RESPONSE_HAS_OPT: u8 = 1 << 3;
    pub const QUERY_HAS_NO_QUESTION: u8 = 1 << 4;
    pub const RESPONSE_HAS_NO_QUESTION: u8 = 1 << 5;
}

/// DNS header flag bits, query side in the low byte.
pub mod dns_flags {
    pub const QUERY_CD: u16 = 1 << 0;
    pub const QUERY_AD: u16 = 1 << 1;
    pub const QUERY_Z: u16 = 1 << 2;
    pub const QUERY_RA: u16 = 1 << 3;
    pub const QUERY_RD: u16 = 1 << 4;
    pub const QUERY_TC: u16 = 1 << 5;
    pub const QUERY_AA: u16 = 1 << 6;
    pub const QUERY_DO: u16 = 1 << 7;
    pub const RESPONSE_CD: u16 = 1 << 8;
    pub const RESPONSE_AD: u16 = 1 << 9;
    pub const RESPONSE_Z: u16 = 1 << 10;
    pub const RESPONSE_RA: u16 = 1 << 11;
    pub const RESPONSE_RD: u16 = 1 << 12;
    pub const RESPONSE_TC: u16 = 1 << 13;
    pub const RESPONSE_AA: u16 = 1 << 14;
}

/// Response processing flag bits.
pub mod response_processing_flags {
    pub const FROM_CACHE: u8 = 1 << 0;
}

/// What kind of collector recorded a query/response pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryResponseType {
    Stub = 0,
    Client = 1,
    Resolver = 2,
    Auth = 3,
    Forwarder = 4,
    Tool = 5,
}

impl TryFrom<u8> for QueryResponseType {
    type Error = CdnsError;

    fn try_from(input: u8) -> Result<Self, Self::Error> {
        match input {
            0 => Ok(Self::Stub),
            1 => Ok(Self::Client),
            2 => Ok(Self::Resolver),
            3 => Ok(Self::Auth),
            4 => Ok(Self::Forwarder),
            5 => Ok(Self::Tool),
            value => Err(CdnsError::Decode(format!(
                "unknown query/response type value: {value}"
            ))),
        }
    }
}

/// The event a per-address counter aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressEventType {
    TcpReset = 0,
    IcmpTimeExceeded = 1,
    IcmpDestUnreachable = 2,
    Icmpv6TimeExceeded = 3,
    Icmpv6DestUnreachable = 4,
    Icmpv6PacketTooBig = 5,
}

impl TryFrom<u8> for AddressEventType {
    type Error = CdnsError;

    fn try_from(input: u8) -> Result<Self, Self::Error> {
        match input {
            0 => Ok(Self::TcpReset),
            1 => Ok(Self::IcmpTimeExceeded),
            2 => Ok(Self::IcmpDestUnreachable),
            3 => Ok(Self::Icmpv6TimeExceeded),
            4 => Ok(Self::Icmpv6DestUnreachable),
            5 => Ok(Self::Icmpv6PacketTooBig),
            value => Err(CdnsError::Decode(format!(
                "unknown address event type value: {value}"
            ))),
        }
    }
}
