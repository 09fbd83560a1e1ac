//! The block: one bounded collection of records, their deduplication tables
//! and a shared time base, emitted as a single CBOR map.

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::trace;

use crate::TableIndex;
use crate::block_table::BlockTable;
use crate::decoder::CborDecoder;
use crate::encoder::CborEncoder;
use crate::error::{CdnsError, Result};
use crate::file_preamble::BlockParameters;
use crate::format::{
    AddressEventType, QueryResponseType, address_event_count_key, block_key, block_preamble_key,
    block_statistics_key, block_tables_key, classtype_key, malformed_message_data_key,
    malformed_message_key, other_data_hints, qr_extended_key, qr_hints, qr_sig_hints, rr_hints,
    qr_signature_key, query_response_key, question_key, response_processing_data_key, rr_key,
};
use crate::hash::{KeyHasher, TableKey};
use crate::records::{
    GenericAddressEventCount, GenericMalformedMessage, GenericQueryResponse,
    GenericResourceRecord,
};
use crate::timestamp::Timestamp;

/// Interned form of an IP address: 4 or 16 octets.
pub(crate) fn ip_to_bytes(address: &IpAddr) -> Vec<u8> {
    match address {
        IpAddr::V4(addr) => addr.octets().to_vec(),
        IpAddr::V6(addr) => addr.octets().to_vec(),
    }
}

pub(crate) fn ip_from_bytes(bytes: &[u8]) -> Result<IpAddr> {
    match bytes.len() {
        4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        length => Err(CdnsError::Decode(format!(
            "IP address table entry has invalid length {length}"
        ))),
    }
}

/// DNS TYPE and CLASS of a question or record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassType {
    pub rtype: u16,
    pub rclass: u16,
}

impl TableKey for ClassType {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_u16(self.rtype);
        hasher.write_u16(self.rclass);
        hasher.finish()
    }
}

impl std::fmt::Display for ClassType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("TYPE={} CLASS={}", self.rtype, self.rclass))
    }
}

impl ClassType {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let mut written = enc.write_map_start(2)?;
        written += enc.write_i64(classtype_key::TYPE)?;
        written += enc.write_u16(self.rtype)?;
        written += enc.write_i64(classtype_key::CLASS)?;
        written += enc.write_u16(self.rclass)?;
        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<ClassType> {
        let mut classtype = ClassType::default();
        let mut seen = [false; 2];

        dec.read_map(|dec, key| {
            match key {
                classtype_key::TYPE => {
                    classtype.rtype = dec.read_unsigned()? as u16;
                    seen[0] = true;
                }
                classtype_key::CLASS => {
                    classtype.rclass = dec.read_unsigned()? as u16;
                    seen[1] = true;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "classtype from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(classtype)
    }
}

/// The deduplicated "shape" of a query/response pair: everything about it
/// that tends to repeat across records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResponseSignature {
    pub server_address_index: Option<TableIndex>,
    pub server_port: Option<u16>,
    pub qr_transport_flags: Option<u8>,
    pub qr_type: Option<QueryResponseType>,
    pub qr_sig_flags: Option<u8>,
    pub query_opcode: Option<u8>,
    pub qr_dns_flags: Option<u16>,
    pub query_rcode: Option<u16>,
    pub query_classtype_index: Option<TableIndex>,
    pub query_qdcount: Option<u16>,
    pub query_ancount: Option<u16>,
    pub query_nscount: Option<u16>,
    pub query_arcount: Option<u16>,
    pub query_edns_version: Option<u8>,
    pub query_udp_size: Option<u16>,
    pub query_opt_rdata_index: Option<TableIndex>,
    pub response_rcode: Option<u16>,
}

impl TableKey for QueryResponseSignature {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_opt_u32(self.server_address_index);
        hasher.write_opt_u16(self.server_port);
        hasher.write_opt_u8(self.qr_transport_flags);
        hasher.write_opt_u8(self.qr_type.map(|t| t as u8));
        hasher.write_opt_u8(self.qr_sig_flags);
        hasher.write_opt_u8(self.query_opcode);
        hasher.write_opt_u16(self.qr_dns_flags);
        hasher.write_opt_u16(self.query_rcode);
        hasher.write_opt_u32(self.query_classtype_index);
        hasher.write_opt_u16(self.query_qdcount);
        hasher.write_opt_u16(self.query_ancount);
        hasher.write_opt_u16(self.query_nscount);
        hasher.write_opt_u16(self.query_arcount);
        hasher.write_opt_u8(self.query_edns_version);
        hasher.write_opt_u16(self.query_udp_size);
        hasher.write_opt_u32(self.query_opt_rdata_index);
        hasher.write_opt_u16(self.response_rcode);
        hasher.finish()
    }
}

impl QueryResponseSignature {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = self.server_address_index.is_some() as usize
            + self.server_port.is_some() as usize
            + self.qr_transport_flags.is_some() as usize
            + self.qr_type.is_some() as usize
            + self.qr_sig_flags.is_some() as usize
            + self.query_opcode.is_some() as usize
            + self.qr_dns_flags.is_some() as usize
            + self.query_rcode.is_some() as usize
            + self.query_classtype_index.is_some() as usize
            + self.query_qdcount.is_some() as usize
            + self.query_ancount.is_some() as usize
            + self.query_nscount.is_some() as usize
            + self.query_arcount.is_some() as usize
            + self.query_edns_version.is_some() as usize
            + self.query_udp_size.is_some() as usize
            + self.query_opt_rdata_index.is_some() as usize
            + self.response_rcode.is_some() as usize;

        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(index) = self.server_address_index {
            written += enc.write_i64(qr_signature_key::SERVER_ADDRESS_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(port) = self.server_port {
            written += enc.write_i64(qr_signature_key::SERVER_PORT)?;
            written += enc.write_u16(port)?;
        }
        if let Some(flags) = self.qr_transport_flags {
            written += enc.write_i64(qr_signature_key::QR_TRANSPORT_FLAGS)?;
            written += enc.write_u8(flags)?;
        }
        if let Some(qr_type) = self.qr_type {
            written += enc.write_i64(qr_signature_key::QR_TYPE)?;
            written += enc.write_u8(qr_type as u8)?;
        }
        if let Some(flags) = self.qr_sig_flags {
            written += enc.write_i64(qr_signature_key::QR_SIG_FLAGS)?;
            written += enc.write_u8(flags)?;
        }
        if let Some(opcode) = self.query_opcode {
            written += enc.write_i64(qr_signature_key::QUERY_OPCODE)?;
            written += enc.write_u8(opcode)?;
        }
        if let Some(flags) = self.qr_dns_flags {
            written += enc.write_i64(qr_signature_key::QR_DNS_FLAGS)?;
            written += enc.write_u16(flags)?;
        }
        if let Some(rcode) = self.query_rcode {
            written += enc.write_i64(qr_signature_key::QUERY_RCODE)?;
            written += enc.write_u16(rcode)?;
        }
        if let Some(index) = self.query_classtype_index {
            written += enc.write_i64(qr_signature_key::QUERY_CLASSTYPE_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(count) = self.query_qdcount {
            written += enc.write_i64(qr_signature_key::QUERY_QDCOUNT)?;
            written += enc.write_u16(count)?;
        }
        if let Some(count) = self.query_ancount {
            written += enc.write_i64(qr_signature_key::QUERY_ANCOUNT)?;
            written += enc.write_u16(count)?;
        }
        if let Some(count) = self.query_nscount {
            written += enc.write_i64(qr_signature_key::QUERY_NSCOUNT)?;
            written += enc.write_u16(count)?;
        }
        if let Some(count) = self.query_arcount {
            written += enc.write_i64(qr_signature_key::QUERY_ARCOUNT)?;
            written += enc.write_u16(count)?;
        }
        if let Some(version) = self.query_edns_version {
            written += enc.write_i64(qr_signature_key::QUERY_EDNS_VERSION)?;
            written += enc.write_u8(version)?;
        }
        if let Some(size) = self.query_udp_size {
            written += enc.write_i64(qr_signature_key::QUERY_UDP_SIZE)?;
            written += enc.write_u16(size)?;
        }
        if let Some(index) = self.query_opt_rdata_index {
            written += enc.write_i64(qr_signature_key::QUERY_OPT_RDATA_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(rcode) = self.response_rcode {
            written += enc.write_i64(qr_signature_key::RESPONSE_RCODE)?;
            written += enc.write_u16(rcode)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<QueryResponseSignature> {
        let mut sig = QueryResponseSignature::default();

        dec.read_map(|dec, key| {
            match key {
                qr_signature_key::SERVER_ADDRESS_INDEX => {
                    sig.server_address_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_signature_key::SERVER_PORT => {
                    sig.server_port = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QR_TRANSPORT_FLAGS => {
                    sig.qr_transport_flags = Some(dec.read_unsigned()? as u8);
                }
                qr_signature_key::QR_TYPE => {
                    sig.qr_type = Some(QueryResponseType::try_from(dec.read_unsigned()? as u8)?);
                }
                qr_signature_key::QR_SIG_FLAGS => {
                    sig.qr_sig_flags = Some(dec.read_unsigned()? as u8);
                }
                qr_signature_key::QUERY_OPCODE => {
                    sig.query_opcode = Some(dec.read_unsigned()? as u8);
                }
                qr_signature_key::QR_DNS_FLAGS => {
                    sig.qr_dns_flags = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_RCODE => {
                    sig.query_rcode = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_CLASSTYPE_INDEX => {
                    sig.query_classtype_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_signature_key::QUERY_QDCOUNT => {
                    sig.query_qdcount = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_ANCOUNT => {
                    sig.query_ancount = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_NSCOUNT => {
                    sig.query_nscount = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_ARCOUNT => {
                    sig.query_arcount = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_EDNS_VERSION => {
                    sig.query_edns_version = Some(dec.read_unsigned()? as u8);
                }
                qr_signature_key::QUERY_UDP_SIZE => {
                    sig.query_udp_size = Some(dec.read_unsigned()? as u16);
                }
                qr_signature_key::QUERY_OPT_RDATA_INDEX => {
                    sig.query_opt_rdata_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_signature_key::RESPONSE_RCODE => {
                    sig.response_rcode = Some(dec.read_unsigned()? as u16);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(sig)
    }
}

/// A question: QNAME and classtype, both by table index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Question {
    pub name_index: TableIndex,
    pub classtype_index: TableIndex,
}

impl TableKey for Question {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_u32(self.name_index);
        hasher.write_u32(self.classtype_index);
        hasher.finish()
    }
}

impl Question {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let mut written = enc.write_map_start(2)?;
        written += enc.write_i64(question_key::NAME_INDEX)?;
        written += enc.write_u32(self.name_index)?;
        written += enc.write_i64(question_key::CLASSTYPE_INDEX)?;
        written += enc.write_u32(self.classtype_index)?;
        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<Question> {
        let mut question = Question::default();
        let mut seen = [false; 2];

        dec.read_map(|dec, key| {
            match key {
                question_key::NAME_INDEX => {
                    question.name_index = dec.read_unsigned()? as TableIndex;
                    seen[0] = true;
                }
                question_key::CLASSTYPE_INDEX => {
                    question.classtype_index = dec.read_unsigned()? as TableIndex;
                    seen[1] = true;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "question from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(question)
    }
}

/// A resource record: name and classtype by index, optional TTL and rdata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rr {
    pub name_index: TableIndex,
    pub classtype_index: TableIndex,
    pub ttl: Option<u32>,
    pub rdata_index: Option<TableIndex>,
}

impl TableKey for Rr {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_u32(self.name_index);
        hasher.write_u32(self.classtype_index);
        hasher.write_opt_u32(self.ttl);
        hasher.write_opt_u32(self.rdata_index);
        hasher.finish()
    }
}

impl Rr {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = 2 + self.ttl.is_some() as usize + self.rdata_index.is_some() as usize;
        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(rr_key::NAME_INDEX)?;
        written += enc.write_u32(self.name_index)?;

        written += enc.write_i64(rr_key::CLASSTYPE_INDEX)?;
        written += enc.write_u32(self.classtype_index)?;

        if let Some(ttl) = self.ttl {
            written += enc.write_i64(rr_key::TTL)?;
            written += enc.write_u32(ttl)?;
        }
        if let Some(index) = self.rdata_index {
            written += enc.write_i64(rr_key::RDATA_INDEX)?;
            written += enc.write_u32(index)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<Rr> {
        let mut rr = Rr::default();
        let mut seen = [false; 2];

        dec.read_map(|dec, key| {
            match key {
                rr_key::NAME_INDEX => {
                    rr.name_index = dec.read_unsigned()? as TableIndex;
                    seen[0] = true;
                }
                rr_key::CLASSTYPE_INDEX => {
                    rr.classtype_index = dec.read_unsigned()? as TableIndex;
                    seen[1] = true;
                }
                rr_key::TTL => {
                    rr.ttl = Some(dec.read_unsigned()? as u32);
                }
                rr_key::RDATA_INDEX => {
                    rr.rdata_index = Some(dec.read_unsigned()? as TableIndex);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "resource record from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(rr)
    }
}

/// Shared data of malformed messages: where they were headed and their raw
/// payload, all optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MalformedMessageData {
    pub server_address_index: Option<TableIndex>,
    pub server_port: Option<u16>,
    pub mm_transport_flags: Option<u8>,
    pub mm_payload: Option<Vec<u8>>,
}

impl TableKey for MalformedMessageData {
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_opt_u32(self.server_address_index);
        hasher.write_opt_u16(self.server_port);
        hasher.write_opt_u8(self.mm_transport_flags);
        hasher.write_opt_bytes(self.mm_payload.as_deref());
        hasher.finish()
    }
}

impl std::fmt::Display for MalformedMessageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(index) = self.server_address_index {
            writeln!(f, "Server address index: {index}")?;
        }
        if let Some(port) = self.server_port {
            writeln!(f, "Server port: {port}")?;
        }
        if let Some(flags) = self.mm_transport_flags {
            writeln!(f, "MM transport flags: {flags:08b}")?;
        }
        if let Some(payload) = &self.mm_payload {
            writeln!(f, "MM payload: {}", hex::encode(payload))?;
        }
        Ok(())
    }
}

impl MalformedMessageData {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = self.server_address_index.is_some() as usize
            + self.server_port.is_some() as usize
            + self.mm_transport_flags.is_some() as usize
            + self.mm_payload.is_some() as usize;

        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(index) = self.server_address_index {
            written += enc.write_i64(malformed_message_data_key::SERVER_ADDRESS_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(port) = self.server_port {
            written += enc.write_i64(malformed_message_data_key::SERVER_PORT)?;
            written += enc.write_u16(port)?;
        }
        if let Some(flags) = self.mm_transport_flags {
            written += enc.write_i64(malformed_message_data_key::MM_TRANSPORT_FLAGS)?;
            written += enc.write_u8(flags)?;
        }
        if let Some(payload) = &self.mm_payload {
            written += enc.write_i64(malformed_message_data_key::MM_PAYLOAD)?;
            written += enc.write_bytestring(payload)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<MalformedMessageData> {
        let mut data = MalformedMessageData::default();

        dec.read_map(|dec, key| {
            match key {
                malformed_message_data_key::SERVER_ADDRESS_INDEX => {
                    data.server_address_index = Some(dec.read_unsigned()? as TableIndex);
                }
                malformed_message_data_key::SERVER_PORT => {
                    data.server_port = Some(dec.read_unsigned()? as u16);
                }
                malformed_message_data_key::MM_TRANSPORT_FLAGS => {
                    data.mm_transport_flags = Some(dec.read_unsigned()? as u8);
                }
                malformed_message_data_key::MM_PAYLOAD => {
                    data.mm_payload = Some(dec.read_bytestring()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(data)
    }
}

/// How a response was put together by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseProcessingData {
    pub bailiwick_index: Option<TableIndex>,
    pub processing_flags: Option<u8>,
}

impl ResponseProcessingData {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields =
            self.bailiwick_index.is_some() as usize + self.processing_flags.is_some() as usize;
        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;
        if let Some(index) = self.bailiwick_index {
            written += enc.write_i64(response_processing_data_key::BAILIWICK_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(flags) = self.processing_flags {
            written += enc.write_i64(response_processing_data_key::PROCESSING_FLAGS)?;
            written += enc.write_u8(flags)?;
        }
        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<ResponseProcessingData> {
        let mut data = ResponseProcessingData::default();

        dec.read_map(|dec, key| {
            match key {
                response_processing_data_key::BAILIWICK_INDEX => {
                    data.bailiwick_index = Some(dec.read_unsigned()? as TableIndex);
                }
                response_processing_data_key::PROCESSING_FLAGS => {
                    data.processing_flags = Some(dec.read_unsigned()? as u8);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(data)
    }
}

/// Indices of one side's question/answer/authority/additional section lists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryResponseExtended {
    pub question_index: Option<TableIndex>,
    pub answer_index: Option<TableIndex>,
    pub authority_index: Option<TableIndex>,
    pub additional_index: Option<TableIndex>,
}

impl QueryResponseExtended {
    fn is_empty(&self) -> bool {
        self.question_index.is_none()
            && self.answer_index.is_none()
            && self.authority_index.is_none()
            && self.additional_index.is_none()
    }

    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = self.question_index.is_some() as usize
            + self.answer_index.is_some() as usize
            + self.authority_index.is_some() as usize
            + self.additional_index.is_some() as usize;
        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;
        if let Some(index) = self.question_index {
            written += enc.write_i64(qr_extended_key::QUESTION_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(index) = self.answer_index {
            written += enc.write_i64(qr_extended_key::ANSWER_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(index) = self.authority_index {
            written += enc.write_i64(qr_extended_key::AUTHORITY_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(index) = self.additional_index {
            written += enc.write_i64(qr_extended_key::ADDITIONAL_INDEX)?;
            written += enc.write_u32(index)?;
        }
        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<QueryResponseExtended> {
        let mut extended = QueryResponseExtended::default();

        dec.read_map(|dec, key| {
            match key {
                qr_extended_key::QUESTION_INDEX => {
                    extended.question_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_extended_key::ANSWER_INDEX => {
                    extended.answer_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_extended_key::AUTHORITY_INDEX => {
                    extended.authority_index = Some(dec.read_unsigned()? as TableIndex);
                }
                qr_extended_key::ADDITIONAL_INDEX => {
                    extended.additional_index = Some(dec.read_unsigned()? as TableIndex);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(extended)
    }
}

/// The block's time base and its index into the file's parameters array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockPreamble {
    /// Earliest timestamp of any record in the block; every record time is
    /// written as an unsigned tick offset from this.
    pub earliest_time: Timestamp,
    /// Missing on the wire means index 0.
    pub block_parameters_index: Option<TableIndex>,
}

impl BlockPreamble {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = 1 + self.block_parameters_index.is_some() as usize;
        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(block_preamble_key::EARLIEST_TIME)?;
        written += self.earliest_time.write(enc)?;

        if let Some(index) = self.block_parameters_index {
            written += enc.write_i64(block_preamble_key::BLOCK_PARAMETERS_INDEX)?;
            written += enc.write_u32(index)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<BlockPreamble> {
        let mut preamble = BlockPreamble::default();

        dec.read_map(|dec, key| {
            match key {
                block_preamble_key::EARLIEST_TIME => {
                    preamble.earliest_time = Timestamp::read(dec)?;
                }
                block_preamble_key::BLOCK_PARAMETERS_INDEX => {
                    preamble.block_parameters_index = Some(dec.read_unsigned()? as TableIndex);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(preamble)
    }
}

/// Counters describing the traffic that went into a block. The caller
/// maintains these and passes them along on appends; the block just stores
/// the latest copy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStatistics {
    pub processed_messages: Option<u64>,
    pub qr_data_items: Option<u64>,
    pub unmatched_queries: Option<u64>,
    pub unmatched_responses: Option<u64>,
    pub discarded_opcode: Option<u64>,
    pub malformed_items: Option<u64>,
}

impl BlockStatistics {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = self.processed_messages.is_some() as usize
            + self.qr_data_items.is_some() as usize
            + self.unmatched_queries.is_some() as usize
            + self.unmatched_responses.is_some() as usize
            + self.discarded_opcode.is_some() as usize
            + self.malformed_items.is_some() as usize;

        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(count) = self.processed_messages {
            written += enc.write_i64(block_statistics_key::PROCESSED_MESSAGES)?;
            written += enc.write_u64(count)?;
        }
        if let Some(count) = self.qr_data_items {
            written += enc.write_i64(block_statistics_key::QR_DATA_ITEMS)?;
            written += enc.write_u64(count)?;
        }
        if let Some(count) = self.unmatched_queries {
            written += enc.write_i64(block_statistics_key::UNMATCHED_QUERIES)?;
            written += enc.write_u64(count)?;
        }
        if let Some(count) = self.unmatched_responses {
            written += enc.write_i64(block_statistics_key::UNMATCHED_RESPONSES)?;
            written += enc.write_u64(count)?;
        }
        if let Some(count) = self.discarded_opcode {
            written += enc.write_i64(block_statistics_key::DISCARDED_OPCODE)?;
            written += enc.write_u64(count)?;
        }
        if let Some(count) = self.malformed_items {
            written += enc.write_i64(block_statistics_key::MALFORMED_ITEMS)?;
            written += enc.write_u64(count)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<BlockStatistics> {
        let mut stats = BlockStatistics::default();

        dec.read_map(|dec, key| {
            match key {
                block_statistics_key::PROCESSED_MESSAGES => {
                    stats.processed_messages = Some(dec.read_unsigned()?);
                }
                block_statistics_key::QR_DATA_ITEMS => {
                    stats.qr_data_items = Some(dec.read_unsigned()?);
                }
                block_statistics_key::UNMATCHED_QUERIES => {
                    stats.unmatched_queries = Some(dec.read_unsigned()?);
                }
                block_statistics_key::UNMATCHED_RESPONSES => {
                    stats.unmatched_responses = Some(dec.read_unsigned()?);
                }
                block_statistics_key::DISCARDED_OPCODE => {
                    stats.discarded_opcode = Some(dec.read_unsigned()?);
                }
                block_statistics_key::MALFORMED_ITEMS => {
                    stats.malformed_items = Some(dec.read_unsigned()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(stats)
    }
}

impl std::fmt::Display for BlockStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(count) = self.processed_messages {
            writeln!(f, "Processed messages: {count}")?;
        }
        if let Some(count) = self.qr_data_items {
            writeln!(f, "Q/R data items: {count}")?;
        }
        if let Some(count) = self.unmatched_queries {
            writeln!(f, "Unmatched queries: {count}")?;
        }
        if let Some(count) = self.unmatched_responses {
            writeln!(f, "Unmatched responses: {count}")?;
        }
        if let Some(count) = self.discarded_opcode {
            writeln!(f, "Discarded OPCODEs: {count}")?;
        }
        if let Some(count) = self.malformed_items {
            writeln!(f, "Malformed items: {count}")?;
        }
        Ok(())
    }
}

/// One query/response record in wire shape: table indices plus scalars.
///
/// `time_offset` holds the record's absolute timestamp while the block is
/// being assembled; the relative offset is computed against the block's
/// earliest time at emit. On read it holds the rehydrated absolute time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResponse {
    pub time_offset: Option<Timestamp>,
    pub client_address_index: Option<TableIndex>,
    pub client_port: Option<u16>,
    pub transaction_id: Option<u16>,
    pub qr_signature_index: Option<TableIndex>,
    pub client_hoplimit: Option<u8>,
    pub response_delay: Option<i64>,
    pub query_name_index: Option<TableIndex>,
    pub query_size: Option<u64>,
    pub response_size: Option<u64>,
    pub response_processing_data: Option<ResponseProcessingData>,
    pub query_extended: Option<QueryResponseExtended>,
    pub response_extended: Option<QueryResponseExtended>,
    pub asn: Option<String>,
    pub country_code: Option<String>,
    pub round_trip_time: Option<i64>,
    pub user_id: Option<String>,
}

impl QueryResponse {
    pub(crate) fn field_count(&self) -> usize {
        self.time_offset.is_some() as usize
            + self.client_address_index.is_some() as usize
            + self.client_port.is_some() as usize
            + self.transaction_id.is_some() as usize
            + self.qr_signature_index.is_some() as usize
            + self.client_hoplimit.is_some() as usize
            + self.response_delay.is_some() as usize
            + self.query_name_index.is_some() as usize
            + self.query_size.is_some() as usize
            + self.response_size.is_some() as usize
            + self.response_processing_data.is_some() as usize
            + self.query_extended.is_some() as usize
            + self.response_extended.is_some() as usize
            + self.asn.is_some() as usize
            + self.country_code.is_some() as usize
            + self.round_trip_time.is_some() as usize
            + self.user_id.is_some() as usize
    }

    pub(crate) fn write(
        &self,
        enc: &mut CborEncoder,
        earliest: &Timestamp,
        ticks_per_second: u64,
    ) -> Result<usize> {
        let fields = self.field_count();
        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(ts) = &self.time_offset {
            written += enc.write_i64(query_response_key::TIME_OFFSET)?;
            written += enc.write_u64(ts.time_offset_from(earliest, ticks_per_second)? as u64)?;
        }
        if let Some(index) = self.client_address_index {
            written += enc.write_i64(query_response_key::CLIENT_ADDRESS_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(port) = self.client_port {
            written += enc.write_i64(query_response_key::CLIENT_PORT)?;
            written += enc.write_u16(port)?;
        }
        if let Some(id) = self.transaction_id {
            written += enc.write_i64(query_response_key::TRANSACTION_ID)?;
            written += enc.write_u16(id)?;
        }
        if let Some(index) = self.qr_signature_index {
            written += enc.write_i64(query_response_key::QR_SIGNATURE_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(hoplimit) = self.client_hoplimit {
            written += enc.write_i64(query_response_key::CLIENT_HOPLIMIT)?;
            written += enc.write_u8(hoplimit)?;
        }
        if let Some(delay) = self.response_delay {
            written += enc.write_i64(query_response_key::RESPONSE_DELAY)?;
            written += enc.write_i64(delay)?;
        }
        if let Some(index) = self.query_name_index {
            written += enc.write_i64(query_response_key::QUERY_NAME_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(size) = self.query_size {
            written += enc.write_i64(query_response_key::QUERY_SIZE)?;
            written += enc.write_u64(size)?;
        }
        if let Some(size) = self.response_size {
            written += enc.write_i64(query_response_key::RESPONSE_SIZE)?;
            written += enc.write_u64(size)?;
        }
        if let Some(data) = &self.response_processing_data {
            written += enc.write_i64(query_response_key::RESPONSE_PROCESSING_DATA)?;
            written += data.write(enc)?;
        }
        if let Some(extended) = &self.query_extended {
            written += enc.write_i64(query_response_key::QUERY_EXTENDED)?;
            written += extended.write(enc)?;
        }
        if let Some(extended) = &self.response_extended {
            written += enc.write_i64(query_response_key::RESPONSE_EXTENDED)?;
            written += extended.write(enc)?;
        }
        if let Some(asn) = &self.asn {
            written += enc.write_i64(query_response_key::ASN)?;
            written += enc.write_textstring(asn)?;
        }
        if let Some(country_code) = &self.country_code {
            written += enc.write_i64(query_response_key::COUNTRY_CODE)?;
            written += enc.write_textstring(country_code)?;
        }
        if let Some(rtt) = self.round_trip_time {
            written += enc.write_i64(query_response_key::ROUND_TRIP_TIME)?;
            written += enc.write_i64(rtt)?;
        }
        if let Some(user_id) = &self.user_id {
            written += enc.write_i64(query_response_key::USER_ID)?;
            written += enc.write_textstring(user_id)?;
        }

        Ok(written)
    }

    /// Read one record off the wire. The time offset is parked in
    /// `time_offset.secs` until the enclosing block rehydrates it against
    /// its earliest time.
    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<QueryResponse> {
        let mut qr = QueryResponse::default();

        dec.read_map(|dec, key| {
            match key {
                query_response_key::TIME_OFFSET => {
                    qr.time_offset = Some(Timestamp::new(dec.read_unsigned()?, 0));
                }
                query_response_key::CLIENT_ADDRESS_INDEX => {
                    qr.client_address_index = Some(dec.read_unsigned()? as TableIndex);
                }
                query_response_key::CLIENT_PORT => {
                    qr.client_port = Some(dec.read_unsigned()? as u16);
                }
                query_response_key::TRANSACTION_ID => {
                    qr.transaction_id = Some(dec.read_unsigned()? as u16);
                }
                query_response_key::QR_SIGNATURE_INDEX => {
                    qr.qr_signature_index = Some(dec.read_unsigned()? as TableIndex);
                }
                query_response_key::CLIENT_HOPLIMIT => {
                    qr.client_hoplimit = Some(dec.read_unsigned()? as u8);
                }
                query_response_key::RESPONSE_DELAY => {
                    qr.response_delay = Some(dec.read_integer()?);
                }
                query_response_key::QUERY_NAME_INDEX => {
                    qr.query_name_index = Some(dec.read_unsigned()? as TableIndex);
                }
                query_response_key::QUERY_SIZE => {
                    qr.query_size = Some(dec.read_unsigned()?);
                }
                query_response_key::RESPONSE_SIZE => {
                    qr.response_size = Some(dec.read_unsigned()?);
                }
                query_response_key::RESPONSE_PROCESSING_DATA => {
                    qr.response_processing_data = Some(ResponseProcessingData::read(dec)?);
                }
                query_response_key::QUERY_EXTENDED => {
                    qr.query_extended = Some(QueryResponseExtended::read(dec)?);
                }
                query_response_key::RESPONSE_EXTENDED => {
                    qr.response_extended = Some(QueryResponseExtended::read(dec)?);
                }
                query_response_key::ASN => {
                    qr.asn = Some(dec.read_textstring()?);
                }
                query_response_key::COUNTRY_CODE => {
                    qr.country_code = Some(dec.read_textstring()?);
                }
                query_response_key::ROUND_TRIP_TIME => {
                    qr.round_trip_time = Some(dec.read_integer()?);
                }
                query_response_key::USER_ID => {
                    qr.user_id = Some(dec.read_textstring()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(qr)
    }
}

/// One aggregated address event counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressEventCount {
    pub ae_type: AddressEventType,
    pub ae_code: Option<u8>,
    pub ae_transport_flags: Option<u8>,
    pub ae_address_index: TableIndex,
    pub ae_count: u64,
}

impl TableKey for AddressEventCount {
    /// The aggregation key is (type, code, transport flags, address index);
    /// the count stays out of the hash.
    fn key_hash(&self) -> u32 {
        let mut hasher = KeyHasher::new();
        hasher.write_u8(self.ae_type as u8);
        hasher.write_opt_u8(self.ae_code);
        hasher.write_opt_u8(self.ae_transport_flags);
        hasher.write_u32(self.ae_address_index);
        hasher.finish()
    }
}

impl AddressEventCount {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields =
            3 + self.ae_code.is_some() as usize + self.ae_transport_flags.is_some() as usize;
        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(address_event_count_key::AE_TYPE)?;
        written += enc.write_u8(self.ae_type as u8)?;

        if let Some(code) = self.ae_code {
            written += enc.write_i64(address_event_count_key::AE_CODE)?;
            written += enc.write_u8(code)?;
        }
        if let Some(flags) = self.ae_transport_flags {
            written += enc.write_i64(address_event_count_key::AE_TRANSPORT_FLAGS)?;
            written += enc.write_u8(flags)?;
        }

        written += enc.write_i64(address_event_count_key::AE_ADDRESS_INDEX)?;
        written += enc.write_u32(self.ae_address_index)?;

        written += enc.write_i64(address_event_count_key::AE_COUNT)?;
        written += enc.write_u64(self.ae_count)?;

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<AddressEventCount> {
        let mut ae_type = None;
        let mut ae_code = None;
        let mut ae_transport_flags = None;
        let mut ae_address_index = None;
        let mut ae_count = None;

        dec.read_map(|dec, key| {
            match key {
                address_event_count_key::AE_TYPE => {
                    ae_type = Some(AddressEventType::try_from(dec.read_unsigned()? as u8)?);
                }
                address_event_count_key::AE_CODE => {
                    ae_code = Some(dec.read_unsigned()? as u8);
                }
                address_event_count_key::AE_TRANSPORT_FLAGS => {
                    ae_transport_flags = Some(dec.read_unsigned()? as u8);
                }
                address_event_count_key::AE_ADDRESS_INDEX => {
                    ae_address_index = Some(dec.read_unsigned()? as TableIndex);
                }
                address_event_count_key::AE_COUNT => {
                    ae_count = Some(dec.read_unsigned()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        match (ae_type, ae_address_index, ae_count) {
            (Some(ae_type), Some(ae_address_index), Some(ae_count)) => Ok(AddressEventCount {
                ae_type,
                ae_code,
                ae_transport_flags,
                ae_address_index,
                ae_count,
            }),
            _ => Err(CdnsError::Decode(
                "address event count from input stream missing one of mandatory items".to_string(),
            )),
        }
    }
}

/// One malformed message record in wire shape. Time handling matches
/// [`QueryResponse`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MalformedMessage {
    pub time_offset: Option<Timestamp>,
    pub client_address_index: Option<TableIndex>,
    pub client_port: Option<u16>,
    pub message_data_index: Option<TableIndex>,
}

impl MalformedMessage {
    pub(crate) fn field_count(&self) -> usize {
        self.time_offset.is_some() as usize
            + self.client_address_index.is_some() as usize
            + self.client_port.is_some() as usize
            + self.message_data_index.is_some() as usize
    }

    pub(crate) fn write(
        &self,
        enc: &mut CborEncoder,
        earliest: &Timestamp,
        ticks_per_second: u64,
    ) -> Result<usize> {
        let fields = self.field_count();
        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(ts) = &self.time_offset {
            written += enc.write_i64(malformed_message_key::TIME_OFFSET)?;
            written += enc.write_u64(ts.time_offset_from(earliest, ticks_per_second)? as u64)?;
        }
        if let Some(index) = self.client_address_index {
            written += enc.write_i64(malformed_message_key::CLIENT_ADDRESS_INDEX)?;
            written += enc.write_u32(index)?;
        }
        if let Some(port) = self.client_port {
            written += enc.write_i64(malformed_message_key::CLIENT_PORT)?;
            written += enc.write_u16(port)?;
        }
        if let Some(index) = self.message_data_index {
            written += enc.write_i64(malformed_message_key::MESSAGE_DATA_INDEX)?;
            written += enc.write_u32(index)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<MalformedMessage> {
        let mut mm = MalformedMessage::default();

        dec.read_map(|dec, key| {
            match key {
                malformed_message_key::TIME_OFFSET => {
                    mm.time_offset = Some(Timestamp::new(dec.read_unsigned()?, 0));
                }
                malformed_message_key::CLIENT_ADDRESS_INDEX => {
                    mm.client_address_index = Some(dec.read_unsigned()? as TableIndex);
                }
                malformed_message_key::CLIENT_PORT => {
                    mm.client_port = Some(dec.read_unsigned()? as u16);
                }
                malformed_message_key::MESSAGE_DATA_INDEX => {
                    mm.message_data_index = Some(dec.read_unsigned()? as TableIndex);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(mm)
    }
}

/// The in-memory block under construction.
///
/// Records appended through the generic interface are hint-filtered, their
/// values interned into the block's nine deduplication tables, and the
/// resulting wire-shape items buffered until the block is written out. The
/// block owns a copy of its parameters plus their index in the file
/// preamble's array; swapping parameters requires an empty block.
pub struct CdnsBlock {
    preamble: BlockPreamble,
    statistics: Option<BlockStatistics>,

    ip_address: BlockTable<Vec<u8>>,
    classtype: BlockTable<ClassType>,
    name_rdata: BlockTable<Vec<u8>>,
    qr_sig: BlockTable<QueryResponseSignature>,
    qlist: BlockTable<Vec<TableIndex>>,
    qrr: BlockTable<Question>,
    rrlist: BlockTable<Vec<TableIndex>>,
    rr: BlockTable<Rr>,
    malformed_message_data: BlockTable<MalformedMessageData>,

    query_responses: Vec<QueryResponse>,
    address_events: BlockTable<AddressEventCount>,
    address_event_totals: Vec<u64>,
    malformed_messages: Vec<MalformedMessage>,

    block_parameters: BlockParameters,
}

impl CdnsBlock {
    /// A fresh block using `block_parameters`, which live at
    /// `block_parameters_index` in the file preamble's array.
    pub fn new(block_parameters: BlockParameters, block_parameters_index: TableIndex) -> Self {
        CdnsBlock {
            preamble: BlockPreamble {
                earliest_time: Timestamp::default(),
                block_parameters_index: Some(block_parameters_index),
            },
            statistics: None,
            ip_address: BlockTable::new(),
            classtype: BlockTable::new(),
            name_rdata: BlockTable::new(),
            qr_sig: BlockTable::new(),
            qlist: BlockTable::new(),
            qrr: BlockTable::new(),
            rrlist: BlockTable::new(),
            rr: BlockTable::new(),
            malformed_message_data: BlockTable::new(),
            query_responses: Vec::new(),
            address_events: BlockTable::new(),
            address_event_totals: Vec::new(),
            malformed_messages: Vec::new(),
            block_parameters,
        }
    }

    pub fn block_parameters(&self) -> &BlockParameters {
        &self.block_parameters
    }

    pub fn block_parameters_index(&self) -> TableIndex {
        self.preamble.block_parameters_index.unwrap_or(0)
    }

    /// Intern an IP address, returning its table index.
    pub fn add_ip_address(&mut self, address: &IpAddr) -> TableIndex {
        self.ip_address.add(ip_to_bytes(address))
    }

    pub fn add_classtype(&mut self, classtype: ClassType) -> TableIndex {
        self.classtype.add(classtype)
    }

    /// Intern a NAME or RDATA byte string.
    pub fn add_name_rdata(&mut self, name_rdata: &[u8]) -> TableIndex {
        self.name_rdata.add(name_rdata.to_vec())
    }

    pub fn add_qr_signature(&mut self, signature: QueryResponseSignature) -> TableIndex {
        self.qr_sig.add(signature)
    }

    pub fn add_question_list(&mut self, list: Vec<TableIndex>) -> TableIndex {
        self.qlist.add(list)
    }

    pub fn add_question(&mut self, question: Question) -> TableIndex {
        self.qrr.add(question)
    }

    pub fn add_rr_list(&mut self, list: Vec<TableIndex>) -> TableIndex {
        self.rrlist.add(list)
    }

    pub fn add_rr(&mut self, rr: Rr) -> TableIndex {
        self.rr.add(rr)
    }

    pub fn add_malformed_message_data(&mut self, data: MalformedMessageData) -> TableIndex {
        self.malformed_message_data.add(data)
    }

    /// Intern a question list: each entry's name and classtype, the
    /// questions themselves, then the index list.
    pub fn add_generic_qlist(&mut self, list: &[GenericResourceRecord]) -> TableIndex {
        let mut qlist = Vec::with_capacity(list.len());
        for record in list {
            let question = Question {
                name_index: self.add_name_rdata(&record.name),
                classtype_index: self.add_classtype(record.classtype),
            };
            qlist.push(self.add_question(question));
        }
        self.add_question_list(qlist)
    }

    /// Intern a resource record list; TTL and rdata obey the RR hints.
    pub fn add_generic_rrlist(&mut self, list: &[GenericResourceRecord]) -> TableIndex {
        let hints = self.block_parameters.storage_parameters.storage_hints.rr_hints;
        let mut rrlist = Vec::with_capacity(list.len());
        for record in list {
            let mut rr = Rr {
                name_index: self.add_name_rdata(&record.name),
                classtype_index: self.add_classtype(record.classtype),
                ttl: None,
                rdata_index: None,
            };
            if hints & rr_hints::TTL != 0 {
                rr.ttl = record.ttl;
            }
            if hints & rr_hints::RDATA_INDEX != 0 {
                if let Some(rdata) = &record.rdata {
                    rr.rdata_index = Some(self.add_name_rdata(rdata));
                }
            }
            rrlist.push(self.add_rr(rr));
        }
        self.add_rr_list(rrlist)
    }

    /// Append a query/response pair. Fields whose hint bit is clear are
    /// dropped; everything else is interned and buffered. Returns `true`
    /// when the block is full — the record is inserted either way, the flag
    /// is advice to flush.
    pub fn add_query_response(
        &mut self,
        record: &GenericQueryResponse,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        let hints = self
            .block_parameters
            .storage_parameters
            .storage_hints
            .query_response_hints;
        let sig_hints = self
            .block_parameters
            .storage_parameters
            .storage_hints
            .query_response_signature_hints;

        // first record in the block pins the time base; later ones only
        // lower it
        if let Some(ts) = &record.ts {
            if (self.query_responses.is_empty() && self.malformed_messages.is_empty())
                || *ts < self.preamble.earliest_time
            {
                self.preamble.earliest_time = *ts;
            }
        }

        let mut qr = QueryResponse::default();

        if hints & qr_hints::TIME_OFFSET != 0 {
            qr.time_offset = record.ts;
        }
        if hints & qr_hints::CLIENT_ADDRESS_INDEX != 0 {
            if let Some(ip) = &record.client_ip {
                qr.client_address_index = Some(self.add_ip_address(ip));
            }
        }
        if hints & qr_hints::CLIENT_PORT != 0 {
            qr.client_port = record.client_port;
        }
        if hints & qr_hints::TRANSACTION_ID != 0 {
            qr.transaction_id = record.transaction_id;
        }

        if hints & qr_hints::QR_SIGNATURE_INDEX != 0 {
            let mut sig = QueryResponseSignature::default();

            if sig_hints & qr_sig_hints::SERVER_ADDRESS_INDEX != 0 {
                if let Some(ip) = &record.server_ip {
                    sig.server_address_index = Some(self.add_ip_address(ip));
                }
            }
            if sig_hints & qr_sig_hints::SERVER_PORT != 0 {
                sig.server_port = record.server_port;
            }
            if sig_hints & qr_sig_hints::QR_TRANSPORT_FLAGS != 0 {
                sig.qr_transport_flags = record.qr_transport_flags;
            }
            if sig_hints & qr_sig_hints::QR_TYPE != 0 {
                sig.qr_type = record.qr_type;
            }
            if sig_hints & qr_sig_hints::QR_SIG_FLAGS != 0 {
                sig.qr_sig_flags = record.qr_sig_flags;
            }
            if sig_hints & qr_sig_hints::QUERY_OPCODE != 0 {
                sig.query_opcode = record.query_opcode;
            }
            if sig_hints & qr_sig_hints::QR_DNS_FLAGS != 0 {
                sig.qr_dns_flags = record.qr_dns_flags;
            }
            if sig_hints & qr_sig_hints::QUERY_RCODE != 0 {
                sig.query_rcode = record.query_rcode;
            }
            if sig_hints & qr_sig_hints::QUERY_CLASSTYPE_INDEX != 0 {
                if let Some(classtype) = record.query_classtype {
                    sig.query_classtype_index = Some(self.add_classtype(classtype));
                }
            }
            if sig_hints & qr_sig_hints::QUERY_QDCOUNT != 0 {
                sig.query_qdcount = record.query_qdcount;
            }
            if sig_hints & qr_sig_hints::QUERY_ANCOUNT != 0 {
                sig.query_ancount = record.query_ancount;
            }
            if sig_hints & qr_sig_hints::QUERY_NSCOUNT != 0 {
                sig.query_nscount = record.query_nscount;
            }
            if sig_hints & qr_sig_hints::QUERY_ARCOUNT != 0 {
                sig.query_arcount = record.query_arcount;
            }
            if sig_hints & qr_sig_hints::QUERY_EDNS_VERSION != 0 {
                sig.query_edns_version = record.query_edns_version;
            }
            if sig_hints & qr_sig_hints::QUERY_UDP_SIZE != 0 {
                sig.query_udp_size = record.query_udp_size;
            }
            if sig_hints & qr_sig_hints::QUERY_OPT_RDATA_INDEX != 0 {
                if let Some(rdata) = &record.query_opt_rdata {
                    sig.query_opt_rdata_index = Some(self.add_name_rdata(rdata));
                }
            }
            if sig_hints & qr_sig_hints::RESPONSE_RCODE != 0 {
                sig.response_rcode = record.response_rcode;
            }

            if sig != QueryResponseSignature::default() {
                qr.qr_signature_index = Some(self.add_qr_signature(sig));
            }
        }

        if hints & qr_hints::CLIENT_HOPLIMIT != 0 {
            qr.client_hoplimit = record.client_hoplimit;
        }
        if hints & qr_hints::RESPONSE_DELAY != 0 {
            qr.response_delay = record.response_delay;
        }
        if hints & qr_hints::QUERY_NAME_INDEX != 0 {
            if let Some(name) = &record.query_name {
                qr.query_name_index = Some(self.add_name_rdata(name));
            }
        }
        if hints & qr_hints::QUERY_SIZE != 0 {
            qr.query_size = record.query_size;
        }
        if hints & qr_hints::RESPONSE_SIZE != 0 {
            qr.response_size = record.response_size;
        }

        if hints & qr_hints::RESPONSE_PROCESSING_DATA != 0 {
            let mut data = ResponseProcessingData::default();
            if let Some(bailiwick) = &record.bailiwick {
                data.bailiwick_index = Some(self.add_name_rdata(bailiwick));
            }
            data.processing_flags = record.processing_flags;
            if data != ResponseProcessingData::default() {
                qr.response_processing_data = Some(data);
            }
        }

        let mut query_extended = QueryResponseExtended::default();
        if hints & qr_hints::QUERY_QUESTION_SECTIONS != 0 {
            if let Some(questions) = &record.query_questions {
                if !questions.is_empty() {
                    query_extended.question_index = Some(self.add_generic_qlist(questions));
                }
            }
        }
        if hints & qr_hints::QUERY_ANSWER_SECTIONS != 0 {
            if let Some(answers) = &record.query_answers {
                if !answers.is_empty() {
                    query_extended.answer_index = Some(self.add_generic_rrlist(answers));
                }
            }
        }
        if hints & qr_hints::QUERY_AUTHORITY_SECTIONS != 0 {
            if let Some(authority) = &record.query_authority {
                if !authority.is_empty() {
                    query_extended.authority_index = Some(self.add_generic_rrlist(authority));
                }
            }
        }
        if hints & qr_hints::QUERY_ADDITIONAL_SECTIONS != 0 {
            if let Some(additional) = &record.query_additional {
                if !additional.is_empty() {
                    query_extended.additional_index = Some(self.add_generic_rrlist(additional));
                }
            }
        }
        if !query_extended.is_empty() {
            qr.query_extended = Some(query_extended);
        }

        let mut response_extended = QueryResponseExtended::default();
        if hints & qr_hints::QUERY_QUESTION_SECTIONS != 0 {
            if let Some(questions) = &record.response_questions {
                if !questions.is_empty() {
                    response_extended.question_index = Some(self.add_generic_qlist(questions));
                }
            }
        }
        if hints & qr_hints::RESPONSE_ANSWER_SECTIONS != 0 {
            if let Some(answers) = &record.response_answers {
                if !answers.is_empty() {
                    response_extended.answer_index = Some(self.add_generic_rrlist(answers));
                }
            }
        }
        if hints & qr_hints::RESPONSE_AUTHORITY_SECTIONS != 0 {
            if let Some(authority) = &record.response_authority {
                if !authority.is_empty() {
                    response_extended.authority_index = Some(self.add_generic_rrlist(authority));
                }
            }
        }
        if hints & qr_hints::RESPONSE_ADDITIONAL_SECTIONS != 0 {
            if let Some(additional) = &record.response_additional {
                if !additional.is_empty() {
                    response_extended.additional_index = Some(self.add_generic_rrlist(additional));
                }
            }
        }
        if !response_extended.is_empty() {
            qr.response_extended = Some(response_extended);
        }

        // extensions aren't hint-gated
        qr.asn = record.asn.clone();
        qr.country_code = record.country_code.clone();
        qr.round_trip_time = record.round_trip_time;
        qr.user_id = record.user_id.clone();

        if qr.field_count() > 0 {
            self.query_responses.push(qr);
        }

        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }

        self.full()
    }

    /// Append an already wire-shaped query/response. The caller vouches for
    /// its indices.
    pub fn add_query_response_item(
        &mut self,
        qr: QueryResponse,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        if qr.field_count() == 0 {
            return self.full();
        }

        if let Some(ts) = &qr.time_offset {
            if (self.query_responses.is_empty() && self.malformed_messages.is_empty())
                || *ts < self.preamble.earliest_time
            {
                self.preamble.earliest_time = *ts;
            }
        }

        self.query_responses.push(qr);
        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }
        self.full()
    }

    /// Count an address event. Events aggregate per (type, code, transport
    /// flags, address); a repeat observation bumps the stored count by one
    /// and the count supplied by the caller is ignored. Dropped silently
    /// when the `address_event_counts` hint bit is clear.
    pub fn add_address_event(
        &mut self,
        event: &GenericAddressEventCount,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        if self.other_data_hints() & other_data_hints::ADDRESS_EVENT_COUNTS == 0 {
            return false;
        }

        let aec = AddressEventCount {
            ae_type: event.ae_type,
            ae_code: event.ae_code,
            ae_transport_flags: event.ae_transport_flags,
            ae_address_index: self.add_ip_address(&event.ip_address),
            ae_count: 0,
        };
        self.count_address_event(aec);

        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }
        self.full()
    }

    /// Wire-shape variant of [`Self::add_address_event`]; aggregation
    /// semantics are identical.
    pub fn add_address_event_item(
        &mut self,
        aec: AddressEventCount,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        if self.other_data_hints() & other_data_hints::ADDRESS_EVENT_COUNTS == 0 {
            return false;
        }

        self.count_address_event(aec);
        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }
        self.full()
    }

    fn other_data_hints(&self) -> u8 {
        self.block_parameters.storage_parameters.storage_hints.other_data_hints
    }

    fn count_address_event(&mut self, aec: AddressEventCount) {
        match self.address_events.find(&aec) {
            Some(index) => self.address_event_totals[index as usize] += 1,
            None => {
                self.address_events.add_value(aec);
                self.address_event_totals.push(1);
            }
        }
    }

    /// Append a malformed message. Dropped silently when the
    /// `malformed_messages` hint bit is clear.
    pub fn add_malformed_message(
        &mut self,
        message: &GenericMalformedMessage,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        if self.other_data_hints() & other_data_hints::MALFORMED_MESSAGES == 0 {
            return false;
        }

        if let Some(ts) = &message.ts {
            if (self.query_responses.is_empty() && self.malformed_messages.is_empty())
                || *ts < self.preamble.earliest_time
            {
                self.preamble.earliest_time = *ts;
            }
        }

        let mut mm = MalformedMessage {
            time_offset: message.ts,
            client_address_index: None,
            client_port: message.client_port,
            message_data_index: None,
        };
        if let Some(ip) = &message.client_ip {
            mm.client_address_index = Some(self.add_ip_address(ip));
        }

        let mut data = MalformedMessageData {
            server_address_index: None,
            server_port: message.server_port,
            mm_transport_flags: message.mm_transport_flags,
            mm_payload: message.mm_payload.clone(),
        };
        if let Some(ip) = &message.server_ip {
            data.server_address_index = Some(self.add_ip_address(ip));
        }
        if data != MalformedMessageData::default() {
            mm.message_data_index = Some(self.add_malformed_message_data(data));
        }

        if mm.field_count() > 0 {
            self.malformed_messages.push(mm);
        }

        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }
        self.full()
    }

    /// Wire-shape variant of [`Self::add_malformed_message`].
    pub fn add_malformed_message_item(
        &mut self,
        mm: MalformedMessage,
        statistics: Option<&BlockStatistics>,
    ) -> bool {
        if self.other_data_hints() & other_data_hints::MALFORMED_MESSAGES == 0 {
            return false;
        }

        if mm.field_count() == 0 {
            return self.full();
        }

        if let Some(ts) = &mm.time_offset {
            if (self.query_responses.is_empty() && self.malformed_messages.is_empty())
                || *ts < self.preamble.earliest_time
            {
                self.preamble.earliest_time = *ts;
            }
        }

        self.malformed_messages.push(mm);
        if let Some(statistics) = statistics {
            self.statistics = Some(*statistics);
        }
        self.full()
    }

    /// Overall number of items buffered (can reach three times
    /// `max_block_items`, which caps each array individually).
    pub fn item_count(&self) -> usize {
        self.query_responses.len() + self.address_events.size() + self.malformed_messages.len()
    }

    pub fn qr_count(&self) -> usize {
        self.query_responses.len()
    }

    pub fn aec_count(&self) -> usize {
        self.address_events.size()
    }

    pub fn mm_count(&self) -> usize {
        self.malformed_messages.len()
    }

    /// Whether any of the three item arrays has reached `max_block_items`.
    /// Advisory: appends still succeed on a full block.
    pub fn full(&self) -> bool {
        let max = self.block_parameters.storage_parameters.max_block_items as usize;
        self.query_responses.len() >= max
            || self.address_events.size() >= max
            || self.malformed_messages.len() >= max
    }

    /// No items and no table entries.
    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
            && self.ip_address.is_empty()
            && self.classtype.is_empty()
            && self.name_rdata.is_empty()
            && self.qr_sig.is_empty()
            && self.qlist.is_empty()
            && self.qrr.is_empty()
            && self.rrlist.is_empty()
            && self.rr.is_empty()
            && self.malformed_message_data.is_empty()
    }

    /// Swap in new block parameters. Only legal on an empty block, since
    /// everything buffered so far was filtered under the old hints.
    pub fn set_block_parameters(
        &mut self,
        block_parameters: BlockParameters,
        index: TableIndex,
    ) -> Result<()> {
        if !self.is_empty() {
            return Err(CdnsError::InvalidState(
                "can't change block parameters on a non-empty block".to_string(),
            ));
        }
        self.block_parameters = block_parameters;
        self.preamble.block_parameters_index = Some(index);
        Ok(())
    }

    /// Drop all buffered data and tables; the time base resets. Block
    /// parameters stay.
    pub fn clear(&mut self) {
        self.preamble.earliest_time = Timestamp::default();
        self.statistics = None;

        self.ip_address.clear();
        self.classtype.clear();
        self.name_rdata.clear();
        self.qr_sig.clear();
        self.qlist.clear();
        self.qrr.clear();
        self.rrlist.clear();
        self.rr.clear();
        self.malformed_message_data.clear();

        self.query_responses.clear();
        self.address_events.clear();
        self.address_event_totals.clear();
        self.malformed_messages.clear();
    }

    /// Serialize the block as one CBOR map: preamble, statistics and tables
    /// when present, then the three item arrays. Record timestamps are
    /// written as tick offsets from the block's earliest time.
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let ticks_per_second = self.block_parameters.storage_parameters.ticks_per_second;

        let table_fields = !self.ip_address.is_empty() as usize
            + !self.classtype.is_empty() as usize
            + !self.name_rdata.is_empty() as usize
            + !self.qr_sig.is_empty() as usize
            + !self.qlist.is_empty() as usize
            + !self.qrr.is_empty() as usize
            + !self.rrlist.is_empty() as usize
            + !self.rr.is_empty() as usize
            + !self.malformed_message_data.is_empty() as usize;

        let fields = 1
            + self.statistics.is_some() as usize
            + (table_fields > 0) as usize
            + !self.query_responses.is_empty() as usize
            + (self.address_events.size() > 0) as usize
            + !self.malformed_messages.is_empty() as usize;

        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(block_key::BLOCK_PREAMBLE)?;
        written += self.preamble.write(enc)?;

        if let Some(statistics) = &self.statistics {
            written += enc.write_i64(block_key::BLOCK_STATISTICS)?;
            written += statistics.write(enc)?;
        }

        if table_fields > 0 {
            written += enc.write_i64(block_key::BLOCK_TABLES)?;
            written += self.write_blocktables(enc, table_fields)?;
        }

        if !self.query_responses.is_empty() {
            written += enc.write_i64(block_key::QUERY_RESPONSES)?;
            written += enc.write_array_start(self.query_responses.len())?;
            for qr in &self.query_responses {
                written += qr.write(enc, &self.preamble.earliest_time, ticks_per_second)?;
            }
        }

        if self.address_events.size() > 0 {
            written += enc.write_i64(block_key::ADDRESS_EVENT_COUNTS)?;
            written += enc.write_array_start(self.address_events.size())?;
            for (aec, total) in self.address_events.iter().zip(&self.address_event_totals) {
                let mut item = aec.clone();
                item.ae_count = *total;
                written += item.write(enc)?;
            }
        }

        if !self.malformed_messages.is_empty() {
            written += enc.write_i64(block_key::MALFORMED_MESSAGES)?;
            written += enc.write_array_start(self.malformed_messages.len())?;
            for mm in &self.malformed_messages {
                written += mm.write(enc, &self.preamble.earliest_time, ticks_per_second)?;
            }
        }

        trace!(
            "serialized block: {} q/r, {} address events, {} malformed messages",
            self.qr_count(),
            self.aec_count(),
            self.mm_count()
        );
        Ok(written)
    }

    /// Block tables map, canonical key order, non-empty tables only.
    fn write_blocktables(&self, enc: &mut CborEncoder, fields: usize) -> Result<usize> {
        let mut written = enc.write_map_start(fields)?;

        if !self.ip_address.is_empty() {
            written += enc.write_i64(block_tables_key::IP_ADDRESS)?;
            written += enc.write_array_start(self.ip_address.size())?;
            for address in self.ip_address.iter() {
                written += enc.write_bytestring(address)?;
            }
        }
        if !self.classtype.is_empty() {
            written += enc.write_i64(block_tables_key::CLASSTYPE)?;
            written += enc.write_array_start(self.classtype.size())?;
            for classtype in self.classtype.iter() {
                written += classtype.write(enc)?;
            }
        }
        if !self.name_rdata.is_empty() {
            written += enc.write_i64(block_tables_key::NAME_RDATA)?;
            written += enc.write_array_start(self.name_rdata.size())?;
            for name_rdata in self.name_rdata.iter() {
                written += enc.write_bytestring(name_rdata)?;
            }
        }
        if !self.qr_sig.is_empty() {
            written += enc.write_i64(block_tables_key::QR_SIG)?;
            written += enc.write_array_start(self.qr_sig.size())?;
            for signature in self.qr_sig.iter() {
                written += signature.write(enc)?;
            }
        }
        if !self.qlist.is_empty() {
            written += enc.write_i64(block_tables_key::QLIST)?;
            written += enc.write_array_start(self.qlist.size())?;
            for list in self.qlist.iter() {
                written += write_index_list(enc, list)?;
            }
        }
        if !self.qrr.is_empty() {
            written += enc.write_i64(block_tables_key::QRR)?;
            written += enc.write_array_start(self.qrr.size())?;
            for question in self.qrr.iter() {
                written += question.write(enc)?;
            }
        }
        if !self.rrlist.is_empty() {
            written += enc.write_i64(block_tables_key::RRLIST)?;
            written += enc.write_array_start(self.rrlist.size())?;
            for list in self.rrlist.iter() {
                written += write_index_list(enc, list)?;
            }
        }
        if !self.rr.is_empty() {
            written += enc.write_i64(block_tables_key::RR)?;
            written += enc.write_array_start(self.rr.size())?;
            for rr in self.rr.iter() {
                written += rr.write(enc)?;
            }
        }
        if !self.malformed_message_data.is_empty() {
            written += enc.write_i64(block_tables_key::MALFORMED_MESSAGE_DATA)?;
            written += enc.write_array_start(self.malformed_message_data.size())?;
            for data in self.malformed_message_data.iter() {
                written += data.write(enc)?;
            }
        }

        Ok(written)
    }
}

fn write_index_list(enc: &mut CborEncoder, list: &[TableIndex]) -> Result<usize> {
    let mut written = enc.write_array_start(list.len())?;
    for index in list {
        written += enc.write_u32(*index)?;
    }
    Ok(written)
}
