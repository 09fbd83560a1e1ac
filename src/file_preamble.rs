//! File preamble: format versions plus the array of block parameter sets
//! every block in the file indexes into.
//!
//! The parameters tree derives serde traits so capture profiles can live in
//! JSON files next to whatever configuration the collector already keeps.

use std::fmt::Display;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::TableIndex;
use crate::decoder::CborDecoder;
use crate::encoder::CborEncoder;
use crate::error::{CdnsError, Result};
use crate::format::{
    block_parameters_key, collection_parameters_key, file_preamble_key, other_data_hints,
    storage_hints_key, storage_parameters_key,
};

/// Format version implemented by this crate: RFC 8618 1.0, private 1.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
pub const VERSION_PRIVATE: u8 = 1;

pub const DEFAULT_TICKS_PER_SECOND: u64 = 1_000_000;
pub const DEFAULT_MAX_BLOCK_ITEMS: u64 = 10_000;

/// All 18 query/response hint bits set.
pub const DEFAULT_QR_HINTS: u32 = (1 << 18) - 1;
/// All 17 signature hint bits set.
pub const DEFAULT_QR_SIG_HINTS: u32 = (1 << 17) - 1;
pub const DEFAULT_RR_HINTS: u8 = (1 << 2) - 1;
pub const DEFAULT_OTHER_DATA_HINTS: u8 =
    other_data_hints::MALFORMED_MESSAGES | other_data_hints::ADDRESS_EVENT_COUNTS;

/// DNS opcodes a default capture accepts (QUERY, IQUERY, STATUS, NOTIFY,
/// UPDATE, DSO).
pub const DEFAULT_OPCODES: &[u8] = &[0, 1, 2, 4, 5, 6];

/// Resource record type numbers a default capture accepts.
pub const DEFAULT_RR_TYPES: &[u16] = &[
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26,
    27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48, 49,
    50, 51, 52, 53, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 99, 100, 101, 102, 103, 104, 105,
    106, 107, 108, 109, 249, 250, 251, 252, 253, 254, 255, 256, 257, 258, 259, 260, 32768, 32769,
];

/// Bitmasks gating which fields are eligible for storage. A clear bit means
/// the corresponding field is dropped before it ever reaches a block.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct StorageHints {
    pub query_response_hints: u32,
    pub query_response_signature_hints: u32,
    pub rr_hints: u8,
    pub other_data_hints: u8,
}

impl Default for StorageHints {
    fn default() -> Self {
        StorageHints {
            query_response_hints: DEFAULT_QR_HINTS,
            query_response_signature_hints: DEFAULT_QR_SIG_HINTS,
            rr_hints: DEFAULT_RR_HINTS,
            other_data_hints: DEFAULT_OTHER_DATA_HINTS,
        }
    }
}

impl StorageHints {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let mut written = enc.write_map_start(4)?;

        written += enc.write_i64(storage_hints_key::QUERY_RESPONSE_HINTS)?;
        written += enc.write_u32(self.query_response_hints)?;

        written += enc.write_i64(storage_hints_key::QUERY_RESPONSE_SIGNATURE_HINTS)?;
        written += enc.write_u32(self.query_response_signature_hints)?;

        written += enc.write_i64(storage_hints_key::RR_HINTS)?;
        written += enc.write_u8(self.rr_hints)?;

        written += enc.write_i64(storage_hints_key::OTHER_DATA_HINTS)?;
        written += enc.write_u8(self.other_data_hints)?;

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<StorageHints> {
        let mut hints = StorageHints::default();
        let mut seen = [false; 4];

        dec.read_map(|dec, key| {
            match key {
                storage_hints_key::QUERY_RESPONSE_HINTS => {
                    hints.query_response_hints = dec.read_unsigned()? as u32;
                    seen[0] = true;
                }
                storage_hints_key::QUERY_RESPONSE_SIGNATURE_HINTS => {
                    hints.query_response_signature_hints = dec.read_unsigned()? as u32;
                    seen[1] = true;
                }
                storage_hints_key::RR_HINTS => {
                    hints.rr_hints = dec.read_unsigned()? as u8;
                    seen[2] = true;
                }
                storage_hints_key::OTHER_DATA_HINTS => {
                    hints.other_data_hints = dec.read_unsigned()? as u8;
                    seen[3] = true;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "storage hints from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(hints)
    }
}

impl Display for StorageHints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Query response hints: {:032b}",
            self.query_response_hints
        )?;
        writeln!(
            f,
            "Query response signature hints: {:032b}",
            self.query_response_signature_hints
        )?;
        writeln!(f, "RR hints: {:08b}", self.rr_hints)?;
        writeln!(f, "Other data hints: {:08b}", self.other_data_hints)
    }
}

/// How records are stored inside blocks: timestamp resolution, block size
/// limit, hint masks, and collector policy notes.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct StorageParameters {
    /// Subsecond resolution of every timestamp in blocks using these
    /// parameters. Must not be zero.
    pub ticks_per_second: u64,
    /// Cap on each of a block's three item arrays, after which the block
    /// reports itself full.
    pub max_block_items: u64,
    pub storage_hints: StorageHints,
    /// DNS opcode numbers the collector accepted
    pub opcodes: Vec<u8>,
    /// Resource record type numbers the collector accepted
    pub rr_types: Vec<u16>,
    pub storage_flags: Option<u8>,
    pub client_address_prefix_ipv4: Option<u8>,
    pub client_address_prefix_ipv6: Option<u8>,
    pub server_address_prefix_ipv4: Option<u8>,
    pub server_address_prefix_ipv6: Option<u8>,
    pub sampling_method: Option<String>,
    pub anonymization_method: Option<String>,
}

impl Default for StorageParameters {
    fn default() -> Self {
        StorageParameters {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            max_block_items: DEFAULT_MAX_BLOCK_ITEMS,
            storage_hints: StorageHints::default(),
            opcodes: DEFAULT_OPCODES.to_vec(),
            rr_types: DEFAULT_RR_TYPES.to_vec(),
            storage_flags: None,
            client_address_prefix_ipv4: None,
            client_address_prefix_ipv6: None,
            server_address_prefix_ipv4: None,
            server_address_prefix_ipv6: None,
            sampling_method: None,
            anonymization_method: None,
        }
    }
}

impl StorageParameters {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = 5
            + self.storage_flags.is_some() as usize
            + self.client_address_prefix_ipv4.is_some() as usize
            + self.client_address_prefix_ipv6.is_some() as usize
            + self.server_address_prefix_ipv4.is_some() as usize
            + self.server_address_prefix_ipv6.is_some() as usize
            + self.sampling_method.is_some() as usize
            + self.anonymization_method.is_some() as usize;

        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(storage_parameters_key::TICKS_PER_SECOND)?;
        written += enc.write_u64(self.ticks_per_second)?;

        written += enc.write_i64(storage_parameters_key::MAX_BLOCK_ITEMS)?;
        written += enc.write_u64(self.max_block_items)?;

        written += enc.write_i64(storage_parameters_key::STORAGE_HINTS)?;
        written += self.storage_hints.write(enc)?;

        written += enc.write_i64(storage_parameters_key::OPCODES)?;
        written += enc.write_array_start(self.opcodes.len())?;
        for opcode in &self.opcodes {
            written += enc.write_u8(*opcode)?;
        }

        written += enc.write_i64(storage_parameters_key::RR_TYPES)?;
        written += enc.write_array_start(self.rr_types.len())?;
        for rr_type in &self.rr_types {
            written += enc.write_u16(*rr_type)?;
        }

        if let Some(flags) = self.storage_flags {
            written += enc.write_i64(storage_parameters_key::STORAGE_FLAGS)?;
            written += enc.write_u8(flags)?;
        }
        if let Some(prefix) = self.client_address_prefix_ipv4 {
            written += enc.write_i64(storage_parameters_key::CLIENT_ADDRESS_PREFIX_IPV4)?;
            written += enc.write_u8(prefix)?;
        }
        if let Some(prefix) = self.client_address_prefix_ipv6 {
            written += enc.write_i64(storage_parameters_key::CLIENT_ADDRESS_PREFIX_IPV6)?;
            written += enc.write_u8(prefix)?;
        }
        if let Some(prefix) = self.server_address_prefix_ipv4 {
            written += enc.write_i64(storage_parameters_key::SERVER_ADDRESS_PREFIX_IPV4)?;
            written += enc.write_u8(prefix)?;
        }
        if let Some(prefix) = self.server_address_prefix_ipv6 {
            written += enc.write_i64(storage_parameters_key::SERVER_ADDRESS_PREFIX_IPV6)?;
            written += enc.write_u8(prefix)?;
        }
        if let Some(method) = &self.sampling_method {
            written += enc.write_i64(storage_parameters_key::SAMPLING_METHOD)?;
            written += enc.write_textstring(method)?;
        }
        if let Some(method) = &self.anonymization_method {
            written += enc.write_i64(storage_parameters_key::ANONYMIZATION_METHOD)?;
            written += enc.write_textstring(method)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<StorageParameters> {
        let mut params = StorageParameters::default();
        let mut seen = [false; 5];

        dec.read_map(|dec, key| {
            match key {
                storage_parameters_key::TICKS_PER_SECOND => {
                    params.ticks_per_second = dec.read_unsigned()?;
                    seen[0] = true;
                }
                storage_parameters_key::MAX_BLOCK_ITEMS => {
                    params.max_block_items = dec.read_unsigned()?;
                    seen[1] = true;
                }
                storage_parameters_key::STORAGE_HINTS => {
                    params.storage_hints = StorageHints::read(dec)?;
                    seen[2] = true;
                }
                storage_parameters_key::OPCODES => {
                    params.opcodes.clear();
                    let opcodes = &mut params.opcodes;
                    dec.read_array(|dec| {
                        opcodes.push(dec.read_unsigned()? as u8);
                        Ok(())
                    })?;
                    seen[3] = true;
                }
                storage_parameters_key::RR_TYPES => {
                    params.rr_types.clear();
                    let rr_types = &mut params.rr_types;
                    dec.read_array(|dec| {
                        rr_types.push(dec.read_unsigned()? as u16);
                        Ok(())
                    })?;
                    seen[4] = true;
                }
                storage_parameters_key::STORAGE_FLAGS => {
                    params.storage_flags = Some(dec.read_unsigned()? as u8);
                }
                storage_parameters_key::CLIENT_ADDRESS_PREFIX_IPV4 => {
                    params.client_address_prefix_ipv4 = Some(dec.read_unsigned()? as u8);
                }
                storage_parameters_key::CLIENT_ADDRESS_PREFIX_IPV6 => {
                    params.client_address_prefix_ipv6 = Some(dec.read_unsigned()? as u8);
                }
                storage_parameters_key::SERVER_ADDRESS_PREFIX_IPV4 => {
                    params.server_address_prefix_ipv4 = Some(dec.read_unsigned()? as u8);
                }
                storage_parameters_key::SERVER_ADDRESS_PREFIX_IPV6 => {
                    params.server_address_prefix_ipv6 = Some(dec.read_unsigned()? as u8);
                }
                storage_parameters_key::SAMPLING_METHOD => {
                    params.sampling_method = Some(dec.read_textstring()?);
                }
                storage_parameters_key::ANONYMIZATION_METHOD => {
                    params.anonymization_method = Some(dec.read_textstring()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "storage parameters from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(params)
    }
}

impl Display for StorageParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Ticks per second: {}", self.ticks_per_second)?;
        writeln!(f, "Max block items: {}", self.max_block_items)?;
        write!(f, "{}", self.storage_hints)?;
        writeln!(
            f,
            "OPCODES: {}",
            self.opcodes
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        writeln!(
            f,
            "RR types: {}",
            self.rr_types
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        if let Some(flags) = self.storage_flags {
            writeln!(f, "Storage flags: {flags:08b}")?;
        }
        if let Some(prefix) = self.client_address_prefix_ipv4 {
            writeln!(f, "Client address prefix IPv4: {prefix}")?;
        }
        if let Some(prefix) = self.client_address_prefix_ipv6 {
            writeln!(f, "Client address prefix IPv6: {prefix}")?;
        }
        if let Some(prefix) = self.server_address_prefix_ipv4 {
            writeln!(f, "Server address prefix IPv4: {prefix}")?;
        }
        if let Some(prefix) = self.server_address_prefix_ipv6 {
            writeln!(f, "Server address prefix IPv6: {prefix}")?;
        }
        if let Some(method) = &self.sampling_method {
            writeln!(f, "Sampling method: {method}")?;
        }
        if let Some(method) = &self.anonymization_method {
            writeln!(f, "Anonymization method: {method}")?;
        }
        Ok(())
    }
}

/// Informational description of how the capture was collected.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct CollectionParameters {
    pub query_timeout: Option<u64>,
    pub skew_timeout: Option<u64>,
    pub snaplen: Option<u64>,
    pub promisc: Option<bool>,
    pub interfaces: Vec<String>,
    /// Server addresses as raw octets, the form they take on the wire
    pub server_address: Vec<Vec<u8>>,
    pub vlan_ids: Vec<u16>,
    pub filter: Option<String>,
    pub generator_id: Option<String>,
    pub host_id: Option<String>,
}

impl CollectionParameters {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = self.query_timeout.is_some() as usize
            + self.skew_timeout.is_some() as usize
            + self.snaplen.is_some() as usize
            + self.promisc.is_some() as usize
            + !self.interfaces.is_empty() as usize
            + !self.server_address.is_empty() as usize
            + !self.vlan_ids.is_empty() as usize
            + self.filter.is_some() as usize
            + self.generator_id.is_some() as usize
            + self.host_id.is_some() as usize;

        if fields == 0 {
            return Ok(0);
        }

        let mut written = enc.write_map_start(fields)?;

        if let Some(timeout) = self.query_timeout {
            written += enc.write_i64(collection_parameters_key::QUERY_TIMEOUT)?;
            written += enc.write_u64(timeout)?;
        }
        if let Some(timeout) = self.skew_timeout {
            written += enc.write_i64(collection_parameters_key::SKEW_TIMEOUT)?;
            written += enc.write_u64(timeout)?;
        }
        if let Some(snaplen) = self.snaplen {
            written += enc.write_i64(collection_parameters_key::SNAPLEN)?;
            written += enc.write_u64(snaplen)?;
        }
        if let Some(promisc) = self.promisc {
            written += enc.write_i64(collection_parameters_key::PROMISC)?;
            written += enc.write_bool(promisc)?;
        }
        if !self.interfaces.is_empty() {
            written += enc.write_i64(collection_parameters_key::INTERFACES)?;
            written += enc.write_array_start(self.interfaces.len())?;
            for interface in &self.interfaces {
                written += enc.write_textstring(interface)?;
            }
        }
        if !self.server_address.is_empty() {
            written += enc.write_i64(collection_parameters_key::SERVER_ADDRESS)?;
            written += enc.write_array_start(self.server_address.len())?;
            for address in &self.server_address {
                written += enc.write_bytestring(address)?;
            }
        }
        if !self.vlan_ids.is_empty() {
            written += enc.write_i64(collection_parameters_key::VLAN_IDS)?;
            written += enc.write_array_start(self.vlan_ids.len())?;
            for id in &self.vlan_ids {
                written += enc.write_u16(*id)?;
            }
        }
        if let Some(filter) = &self.filter {
            written += enc.write_i64(collection_parameters_key::FILTER)?;
            written += enc.write_textstring(filter)?;
        }
        if let Some(generator_id) = &self.generator_id {
            written += enc.write_i64(collection_parameters_key::GENERATOR_ID)?;
            written += enc.write_textstring(generator_id)?;
        }
        if let Some(host_id) = &self.host_id {
            written += enc.write_i64(collection_parameters_key::HOST_ID)?;
            written += enc.write_textstring(host_id)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<CollectionParameters> {
        let mut params = CollectionParameters::default();

        dec.read_map(|dec, key| {
            match key {
                collection_parameters_key::QUERY_TIMEOUT => {
                    params.query_timeout = Some(dec.read_unsigned()?);
                }
                collection_parameters_key::SKEW_TIMEOUT => {
                    params.skew_timeout = Some(dec.read_unsigned()?);
                }
                collection_parameters_key::SNAPLEN => {
                    params.snaplen = Some(dec.read_unsigned()?);
                }
                collection_parameters_key::PROMISC => {
                    params.promisc = Some(dec.read_bool()?);
                }
                collection_parameters_key::INTERFACES => {
                    let interfaces = &mut params.interfaces;
                    dec.read_array(|dec| {
                        interfaces.push(dec.read_textstring()?);
                        Ok(())
                    })?;
                }
                collection_parameters_key::SERVER_ADDRESS => {
                    let addresses = &mut params.server_address;
                    dec.read_array(|dec| {
                        addresses.push(dec.read_bytestring()?);
                        Ok(())
                    })?;
                }
                collection_parameters_key::VLAN_IDS => {
                    let vlan_ids = &mut params.vlan_ids;
                    dec.read_array(|dec| {
                        vlan_ids.push(dec.read_unsigned()? as u16);
                        Ok(())
                    })?;
                }
                collection_parameters_key::FILTER => {
                    params.filter = Some(dec.read_textstring()?);
                }
                collection_parameters_key::GENERATOR_ID => {
                    params.generator_id = Some(dec.read_textstring()?);
                }
                collection_parameters_key::HOST_ID => {
                    params.host_id = Some(dec.read_textstring()?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        Ok(params)
    }
}

impl Display for CollectionParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(timeout) = self.query_timeout {
            writeln!(f, "Query timeout: {timeout}")?;
        }
        if let Some(timeout) = self.skew_timeout {
            writeln!(f, "Skew timeout: {timeout}")?;
        }
        if let Some(snaplen) = self.snaplen {
            writeln!(f, "Snaplen: {snaplen}")?;
        }
        if let Some(promisc) = self.promisc {
            writeln!(f, "Promisc: {promisc}")?;
        }
        if !self.interfaces.is_empty() {
            writeln!(f, "Interfaces: {}", self.interfaces.join(", "))?;
        }
        if !self.vlan_ids.is_empty() {
            writeln!(
                f,
                "VLAN IDs: {}",
                self.vlan_ids
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
        if let Some(filter) = &self.filter {
            writeln!(f, "Filter: {filter}")?;
        }
        if let Some(generator_id) = &self.generator_id {
            writeln!(f, "Generator ID: {generator_id}")?;
        }
        if let Some(host_id) = &self.host_id {
            writeln!(f, "Host ID: {host_id}")?;
        }
        Ok(())
    }
}

/// One entry in the file preamble's parameters array: storage parameters
/// plus optional collection notes.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BlockParameters {
    pub storage_parameters: StorageParameters,
    pub collection_parameters: Option<CollectionParameters>,
}

impl BlockParameters {
    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = 1 + self.collection_parameters.is_some() as usize;
        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(block_parameters_key::STORAGE_PARAMETERS)?;
        written += self.storage_parameters.write(enc)?;

        if let Some(collection) = &self.collection_parameters {
            written += enc.write_i64(block_parameters_key::COLLECTION_PARAMETERS)?;
            written += collection.write(enc)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<BlockParameters> {
        let mut params = BlockParameters::default();
        let mut seen_storage = false;

        dec.read_map(|dec, key| {
            match key {
                block_parameters_key::STORAGE_PARAMETERS => {
                    params.storage_parameters = StorageParameters::read(dec)?;
                    seen_storage = true;
                }
                block_parameters_key::COLLECTION_PARAMETERS => {
                    params.collection_parameters = Some(CollectionParameters::read(dec)?);
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if !seen_storage {
            return Err(CdnsError::Decode(
                "block parameters from input stream missing one of mandatory items".to_string(),
            ));
        }
        Ok(params)
    }
}

/// Versions plus the ordered, non-empty array of block parameter sets shared
/// by every block in the file. The first entry is the default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct FilePreamble {
    pub major_format_version: u8,
    pub minor_format_version: u8,
    pub private_version: Option<u8>,
    pub block_parameters: Vec<BlockParameters>,
}

impl Default for FilePreamble {
    fn default() -> Self {
        FilePreamble {
            major_format_version: VERSION_MAJOR,
            minor_format_version: VERSION_MINOR,
            private_version: Some(VERSION_PRIVATE),
            block_parameters: vec![BlockParameters::default()],
        }
    }
}

impl FilePreamble {
    /// Preamble with the given parameter sets; an empty slice gets the
    /// default set so the array is never empty.
    pub fn new(block_parameters: Vec<BlockParameters>) -> Self {
        let block_parameters = if block_parameters.is_empty() {
            vec![BlockParameters::default()]
        } else {
            block_parameters
        };
        FilePreamble {
            block_parameters,
            ..Default::default()
        }
    }

    /// Append a parameter set, returning its index for use in block
    /// preambles.
    pub fn add_block_parameters(&mut self, params: BlockParameters) -> TableIndex {
        self.block_parameters.push(params);
        (self.block_parameters.len() - 1) as TableIndex
    }

    pub fn block_parameters_count(&self) -> usize {
        self.block_parameters.len()
    }

    pub fn block_parameters(&self, index: TableIndex) -> Result<&BlockParameters> {
        self.block_parameters.get(index as usize).ok_or_else(|| {
            CdnsError::IndexRange(format!(
                "block parameters index {index} out of range ({} entries)",
                self.block_parameters.len()
            ))
        })
    }

    pub(crate) fn write(&self, enc: &mut CborEncoder) -> Result<usize> {
        let fields = 3 + self.private_version.is_some() as usize;
        let mut written = enc.write_map_start(fields)?;

        written += enc.write_i64(file_preamble_key::MAJOR_FORMAT_VERSION)?;
        written += enc.write_u8(self.major_format_version)?;

        written += enc.write_i64(file_preamble_key::MINOR_FORMAT_VERSION)?;
        written += enc.write_u8(self.minor_format_version)?;

        if let Some(version) = self.private_version {
            written += enc.write_i64(file_preamble_key::PRIVATE_VERSION)?;
            written += enc.write_u8(version)?;
        }

        written += enc.write_i64(file_preamble_key::BLOCK_PARAMETERS)?;
        written += enc.write_array_start(self.block_parameters.len())?;
        for params in &self.block_parameters {
            written += params.write(enc)?;
        }

        Ok(written)
    }

    pub(crate) fn read<R: Read>(dec: &mut CborDecoder<R>) -> Result<FilePreamble> {
        let mut preamble = FilePreamble {
            private_version: None,
            block_parameters: Vec::new(),
            ..Default::default()
        };
        let mut seen = [false; 3];

        dec.read_map(|dec, key| {
            match key {
                file_preamble_key::MAJOR_FORMAT_VERSION => {
                    preamble.major_format_version = dec.read_unsigned()? as u8;
                    seen[0] = true;
                }
                file_preamble_key::MINOR_FORMAT_VERSION => {
                    preamble.minor_format_version = dec.read_unsigned()? as u8;
                    seen[1] = true;
                }
                file_preamble_key::PRIVATE_VERSION => {
                    preamble.private_version = Some(dec.read_unsigned()? as u8);
                }
                file_preamble_key::BLOCK_PARAMETERS => {
                    let block_parameters = &mut preamble.block_parameters;
                    dec.read_array(|dec| {
                        block_parameters.push(BlockParameters::read(dec)?);
                        Ok(())
                    })?;
                    seen[2] = true;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if seen.contains(&false) {
            return Err(CdnsError::Decode(
                "file preamble from input stream missing one of mandatory items".to_string(),
            ));
        }
        if preamble.block_parameters.is_empty() {
            return Err(CdnsError::Decode(
                "file preamble carries an empty block parameters array".to_string(),
            ));
        }
        Ok(preamble)
    }
}

impl Display for FilePreamble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Major format version: {}", self.major_format_version)?;
        writeln!(f, "Minor format version: {}", self.minor_format_version)?;
        if let Some(version) = self.private_version {
            writeln!(f, "Private version: {version}")?;
        }
        for (index, params) in self.block_parameters.iter().enumerate() {
            writeln!(f, "\nBlock parameters {index}:")?;
            write!(f, "{}", params.storage_parameters)?;
        }
        Ok(())
    }
}
