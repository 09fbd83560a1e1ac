//! Rehydrating one block off the wire.

use std::io::Read;

use log::trace;

use crate::TableIndex;
use crate::block::{
    AddressEventCount, BlockPreamble, BlockStatistics, ClassType, MalformedMessage,
    MalformedMessageData, QueryResponse, QueryResponseSignature, Question, Rr, ip_from_bytes,
};
use crate::block_table::BlockTable;
use crate::decoder::CborDecoder;
use crate::error::{CdnsError, Result};
use crate::file_preamble::BlockParameters;
use crate::format::{block_key, block_tables_key};
use crate::records::{
    GenericAddressEventCount, GenericMalformedMessage, GenericQueryResponse,
    GenericResourceRecord,
};

/// One block read back into memory: tables filled straight off the wire,
/// record timestamps already restored to absolute time.
///
/// Records stream back out as generic records through the `next_*` methods,
/// with every table index resolved; each method runs its own cursor.
pub struct CdnsBlockRead {
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
    address_events: Vec<AddressEventCount>,
    malformed_messages: Vec<MalformedMessage>,

    block_parameters: BlockParameters,

    qr_cursor: usize,
    aec_cursor: usize,
    mm_cursor: usize,
}

impl CdnsBlockRead {
    /// Read one whole block. `block_parameters` is the file preamble's
    /// array; the block's preamble picks its entry by index (0 when
    /// absent, out of range is a decode error).
    pub(crate) fn read<R: Read>(
        dec: &mut CborDecoder<R>,
        block_parameters: &[BlockParameters],
    ) -> Result<CdnsBlockRead> {
        if block_parameters.is_empty() {
            return Err(CdnsError::Decode(
                "given block parameters array is empty".to_string(),
            ));
        }

        let mut block = CdnsBlockRead {
            preamble: BlockPreamble::default(),
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
            address_events: Vec::new(),
            malformed_messages: Vec::new(),
            block_parameters: BlockParameters::default(),
            qr_cursor: 0,
            aec_cursor: 0,
            mm_cursor: 0,
        };
        let mut seen_preamble = false;

        dec.read_map(|dec, key| {
            match key {
                block_key::BLOCK_PREAMBLE => {
                    block.preamble = BlockPreamble::read(dec)?;
                    if let Some(index) = block.preamble.block_parameters_index {
                        block.block_parameters = block_parameters
                            .get(index as usize)
                            .ok_or_else(|| {
                                CdnsError::Decode(
                                    "block parameters index for C-DNS block is too high"
                                        .to_string(),
                                )
                            })?
                            .clone();
                    }
                    seen_preamble = true;
                }
                block_key::BLOCK_STATISTICS => {
                    block.statistics = Some(BlockStatistics::read(dec)?);
                }
                block_key::BLOCK_TABLES => {
                    Self::read_blocktables(dec, &mut block)?;
                }
                block_key::QUERY_RESPONSES => {
                    let query_responses = &mut block.query_responses;
                    dec.read_array(|dec| {
                        query_responses.push(QueryResponse::read(dec)?);
                        Ok(())
                    })?;
                }
                block_key::ADDRESS_EVENT_COUNTS => {
                    let address_events = &mut block.address_events;
                    dec.read_array(|dec| {
                        address_events.push(AddressEventCount::read(dec)?);
                        Ok(())
                    })?;
                }
                block_key::MALFORMED_MESSAGES => {
                    let malformed_messages = &mut block.malformed_messages;
                    dec.read_array(|dec| {
                        malformed_messages.push(MalformedMessage::read(dec)?);
                        Ok(())
                    })?;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })?;

        if !seen_preamble {
            return Err(CdnsError::Decode(
                "block from input stream missing one of mandatory items".to_string(),
            ));
        }
        if block.preamble.block_parameters_index.is_none() {
            block.block_parameters = block_parameters[0].clone();
        }

        // restore absolute times: the wire carries unsigned tick offsets
        // from the block's earliest time, parked in `time_offset.secs`
        let earliest = block.preamble.earliest_time;
        let ticks_per_second = block.block_parameters.storage_parameters.ticks_per_second;
        for qr in &mut block.query_responses {
            if let Some(offset) = qr.time_offset.take() {
                qr.time_offset =
                    Some(earliest.advanced_by(offset.secs as i64, ticks_per_second)?);
            }
        }
        for mm in &mut block.malformed_messages {
            if let Some(offset) = mm.time_offset.take() {
                mm.time_offset =
                    Some(earliest.advanced_by(offset.secs as i64, ticks_per_second)?);
            }
        }

        trace!(
            "read block: {} q/r, {} address events, {} malformed messages",
            block.query_responses.len(),
            block.address_events.len(),
            block.malformed_messages.len()
        );
        Ok(block)
    }

    fn read_blocktables<R: Read>(dec: &mut CborDecoder<R>, block: &mut Self) -> Result<()> {
        dec.read_map(|dec, key| {
            match key {
                block_tables_key::IP_ADDRESS => {
                    let table = &mut block.ip_address;
                    dec.read_array(|dec| {
                        table.add_value(dec.read_bytestring()?);
                        Ok(())
                    })?;
                }
                block_tables_key::CLASSTYPE => {
                    let table = &mut block.classtype;
                    dec.read_array(|dec| {
                        table.add_value(ClassType::read(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::NAME_RDATA => {
                    let table = &mut block.name_rdata;
                    dec.read_array(|dec| {
                        table.add_value(dec.read_bytestring()?);
                        Ok(())
                    })?;
                }
                block_tables_key::QR_SIG => {
                    let table = &mut block.qr_sig;
                    dec.read_array(|dec| {
                        table.add_value(QueryResponseSignature::read(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::QLIST => {
                    let table = &mut block.qlist;
                    dec.read_array(|dec| {
                        table.add_value(read_index_list(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::QRR => {
                    let table = &mut block.qrr;
                    dec.read_array(|dec| {
                        table.add_value(Question::read(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::RRLIST => {
                    let table = &mut block.rrlist;
                    dec.read_array(|dec| {
                        table.add_value(read_index_list(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::RR => {
                    let table = &mut block.rr;
                    dec.read_array(|dec| {
                        table.add_value(Rr::read(dec)?);
                        Ok(())
                    })?;
                }
                block_tables_key::MALFORMED_MESSAGE_DATA => {
                    let table = &mut block.malformed_message_data;
                    dec.read_array(|dec| {
                        table.add_value(MalformedMessageData::read(dec)?);
                        Ok(())
                    })?;
                }
                _ => dec.skip_item()?,
            }
            Ok(())
        })
    }

    pub fn preamble(&self) -> &BlockPreamble {
        &self.preamble
    }

    pub fn statistics(&self) -> Option<&BlockStatistics> {
        self.statistics.as_ref()
    }

    pub fn block_parameters(&self) -> &BlockParameters {
        &self.block_parameters
    }

    pub fn qr_count(&self) -> usize {
        self.query_responses.len()
    }

    pub fn aec_count(&self) -> usize {
        self.address_events.len()
    }

    pub fn mm_count(&self) -> usize {
        self.malformed_messages.len()
    }

    pub fn item_count(&self) -> usize {
        self.qr_count() + self.aec_count() + self.mm_count()
    }

    /// Next query/response pair, fully resolved against the block tables.
    /// `None` once the block is exhausted.
    pub fn next_query_response(&mut self) -> Result<Option<GenericQueryResponse>> {
        let Some(qr) = self.query_responses.get(self.qr_cursor) else {
            return Ok(None);
        };
        let qr = qr.clone();
        self.qr_cursor += 1;

        let mut record = GenericQueryResponse {
            ts: qr.time_offset,
            client_port: qr.client_port,
            transaction_id: qr.transaction_id,
            client_hoplimit: qr.client_hoplimit,
            response_delay: qr.response_delay,
            query_size: qr.query_size,
            response_size: qr.response_size,
            asn: qr.asn.clone(),
            country_code: qr.country_code.clone(),
            round_trip_time: qr.round_trip_time,
            user_id: qr.user_id.clone(),
            ..Default::default()
        };

        if let Some(index) = qr.client_address_index {
            record.client_ip = Some(ip_from_bytes(self.ip_address.get(index)?)?);
        }

        if let Some(index) = qr.qr_signature_index {
            let sig = self.qr_sig.get(index)?.clone();
            if let Some(index) = sig.server_address_index {
                record.server_ip = Some(ip_from_bytes(self.ip_address.get(index)?)?);
            }
            record.server_port = sig.server_port;
            record.qr_transport_flags = sig.qr_transport_flags;
            record.qr_type = sig.qr_type;
            record.qr_sig_flags = sig.qr_sig_flags;
            record.query_opcode = sig.query_opcode;
            record.qr_dns_flags = sig.qr_dns_flags;
            record.query_rcode = sig.query_rcode;
            if let Some(index) = sig.query_classtype_index {
                record.query_classtype = Some(*self.classtype.get(index)?);
            }
            record.query_qdcount = sig.query_qdcount;
            record.query_ancount = sig.query_ancount;
            record.query_nscount = sig.query_nscount;
            record.query_arcount = sig.query_arcount;
            record.query_edns_version = sig.query_edns_version;
            record.query_udp_size = sig.query_udp_size;
            if let Some(index) = sig.query_opt_rdata_index {
                record.query_opt_rdata = Some(self.name_rdata.get(index)?.clone());
            }
            record.response_rcode = sig.response_rcode;
        }

        if let Some(index) = qr.query_name_index {
            record.query_name = Some(self.name_rdata.get(index)?.clone());
        }

        if let Some(data) = &qr.response_processing_data {
            if let Some(index) = data.bailiwick_index {
                record.bailiwick = Some(self.name_rdata.get(index)?.clone());
            }
            record.processing_flags = data.processing_flags;
        }

        if let Some(extended) = &qr.query_extended {
            if let Some(index) = extended.question_index {
                record.query_questions = Some(self.generic_q_list(index)?);
            }
            if let Some(index) = extended.answer_index {
                record.query_answers = Some(self.generic_rr_list(index)?);
            }
            if let Some(index) = extended.authority_index {
                record.query_authority = Some(self.generic_rr_list(index)?);
            }
            if let Some(index) = extended.additional_index {
                record.query_additional = Some(self.generic_rr_list(index)?);
            }
        }

        if let Some(extended) = &qr.response_extended {
            if let Some(index) = extended.question_index {
                record.response_questions = Some(self.generic_q_list(index)?);
            }
            if let Some(index) = extended.answer_index {
                record.response_answers = Some(self.generic_rr_list(index)?);
            }
            if let Some(index) = extended.authority_index {
                record.response_authority = Some(self.generic_rr_list(index)?);
            }
            if let Some(index) = extended.additional_index {
                record.response_additional = Some(self.generic_rr_list(index)?);
            }
        }

        Ok(Some(record))
    }

    /// Next aggregated address event, with the stored total in `ae_count`.
    pub fn next_address_event(&mut self) -> Result<Option<GenericAddressEventCount>> {
        let Some(aec) = self.address_events.get(self.aec_cursor) else {
            return Ok(None);
        };
        let aec = aec.clone();
        self.aec_cursor += 1;

        Ok(Some(GenericAddressEventCount {
            ae_type: aec.ae_type,
            ae_code: aec.ae_code,
            ae_transport_flags: aec.ae_transport_flags,
            ip_address: ip_from_bytes(self.ip_address.get(aec.ae_address_index)?)?,
            ae_count: aec.ae_count,
        }))
    }

    /// Next malformed message with its data resolved.
    pub fn next_malformed_message(&mut self) -> Result<Option<GenericMalformedMessage>> {
        let Some(mm) = self.malformed_messages.get(self.mm_cursor) else {
            return Ok(None);
        };
        let mm = *mm;
        self.mm_cursor += 1;

        let mut record = GenericMalformedMessage {
            ts: mm.time_offset,
            client_port: mm.client_port,
            ..Default::default()
        };

        if let Some(index) = mm.client_address_index {
            record.client_ip = Some(ip_from_bytes(self.ip_address.get(index)?)?);
        }

        if let Some(index) = mm.message_data_index {
            let data = self.malformed_message_data.get(index)?.clone();
            if let Some(index) = data.server_address_index {
                record.server_ip = Some(ip_from_bytes(self.ip_address.get(index)?)?);
            }
            record.server_port = data.server_port;
            record.mm_transport_flags = data.mm_transport_flags;
            record.mm_payload = data.mm_payload;
        }

        Ok(Some(record))
    }

    fn generic_q_list(&self, index: TableIndex) -> Result<Vec<GenericResourceRecord>> {
        let list = self.qlist.get(index)?;
        let mut records = Vec::with_capacity(list.len());
        for question_index in list {
            let question = self.qrr.get(*question_index)?;
            records.push(GenericResourceRecord {
                name: self.name_rdata.get(question.name_index)?.clone(),
                classtype: *self.classtype.get(question.classtype_index)?,
                ttl: None,
                rdata: None,
            });
        }
        Ok(records)
    }

    fn generic_rr_list(&self, index: TableIndex) -> Result<Vec<GenericResourceRecord>> {
        let list = self.rrlist.get(index)?;
        let mut records = Vec::with_capacity(list.len());
        for rr_index in list {
            let rr = self.rr.get(*rr_index)?;
            let rdata = match rr.rdata_index {
                Some(index) => Some(self.name_rdata.get(index)?.clone()),
                None => None,
            };
            records.push(GenericResourceRecord {
                name: self.name_rdata.get(rr.name_index)?.clone(),
                classtype: *self.classtype.get(rr.classtype_index)?,
                ttl: rr.ttl,
                rdata,
            });
        }
        Ok(records)
    }
}

impl std::fmt::Display for CdnsBlockRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Earliest time: {}", self.preamble.earliest_time)?;
        if let Some(statistics) = &self.statistics {
            write!(f, "{statistics}")?;
        }
        writeln!(f, "IP address table items: {}", self.ip_address.size())?;
        writeln!(f, "ClassType table items: {}", self.classtype.size())?;
        writeln!(f, "NAME/RDATA table items: {}", self.name_rdata.size())?;
        writeln!(f, "Q/R signature table items: {}", self.qr_sig.size())?;
        writeln!(f, "Question list table items: {}", self.qlist.size())?;
        writeln!(f, "Question table items: {}", self.qrr.size())?;
        writeln!(f, "RR list table items: {}", self.rrlist.size())?;
        writeln!(f, "RR table items: {}", self.rr.size())?;
        writeln!(
            f,
            "Malformed message data table items: {}",
            self.malformed_message_data.size()
        )?;
        writeln!(f, "Query/response items: {}", self.query_responses.len())?;
        writeln!(f, "Address event count items: {}", self.address_events.len())?;
        writeln!(
            f,
            "Malformed message items: {}",
            self.malformed_messages.len()
        )
    }
}

fn read_index_list<R: Read>(dec: &mut CborDecoder<R>) -> Result<Vec<TableIndex>> {
    let mut list = Vec::new();
    dec.read_array(|dec| {
        list.push(dec.read_unsigned()? as TableIndex);
        Ok(())
    })?;
    Ok(list)
}
