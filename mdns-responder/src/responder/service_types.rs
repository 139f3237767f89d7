//! Service type enumeration.
//!
//! One aggregator exists per registered service *type*, answering the
//! `_services._dns-sd._udp.local.` meta-query with a PTR per type. The
//! aggregator reference-counts the service entries providing its type and
//! is dropped when the count reaches zero.

use std::time::Instant;

use shared::error::Result;

use crate::config::SERVICES_PTR_TTL;
use crate::message::DnsType;
use crate::responder::entry::{AnswerInfo, FireTime, RecordInfo};
use crate::responder::tx::{Section, TxMessage, TxMessageType};

pub(crate) struct ServiceTypeEntry {
    pub(crate) service_type: String,
    pub(crate) services_ptr: RecordInfo,
    pub(crate) num_entries: u16,
    pub(crate) fire_time: FireTime,
}

impl ServiceTypeEntry {
    pub(crate) fn new(service_type: &str, now: Instant) -> Self {
        let mut entry = Self {
            service_type: service_type.to_owned(),
            services_ptr: RecordInfo::default(),
            num_entries: 0,
            fire_time: FireTime::default(),
        };

        // A new service type announces its enumeration PTR right away.
        entry.services_ptr.update_ttl(SERVICES_PTR_TTL, now);
        entry.services_ptr.start_announcing(now);
        entry.update_fire_time(now);

        entry
    }

    pub(crate) fn matches(&self, service_type: &str) -> bool {
        self.service_type.eq_ignore_ascii_case(service_type)
    }

    pub(crate) fn full_type_name(&self) -> String {
        format!("{}.local.", self.service_type)
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.services_ptr.mark_as_not_appended();
    }

    pub(crate) fn answer_question(&mut self, info: &AnswerInfo, now: Instant) {
        if !self.services_ptr.can_answer() {
            return;
        }
        self.services_ptr.schedule_answer(info);
        self.update_fire_time(now);
    }

    /// Whether a known answer with the given TTL suppresses our
    /// enumeration PTR for this type.
    pub(crate) fn should_suppress_known_answer(&self, ttl: u32) -> bool {
        (ttl as u64) * 2 >= self.services_ptr.ttl() as u64
    }

    pub(crate) fn update_fire_time(&mut self, now: Instant) {
        let mut fire_time = self.fire_time;
        self.services_ptr.update_fire_time_on(&mut fire_time, now);
        self.fire_time = fire_time;
    }

    /// Appends the enumeration PTR. `service_type_offset` is a compression
    /// offset for the type name discovered from a service entry already
    /// appended in the same message, if any.
    pub(crate) fn append_ptr_record_to(
        &mut self,
        tx: &mut TxMessage,
        service_type_offset: u16,
        now: Instant,
    ) -> Result<()> {
        if !self.services_ptr.can_append() {
            return Ok(());
        }
        self.services_ptr
            .mark_as_appended(tx.get_type(), Section::Answer, now);

        let ttl = self.services_ptr.ttl();

        tx.append_services_dnssd_name(Section::Answer)?;
        let len_off = tx.append_record_header(Section::Answer, DnsType::Ptr, 1, ttl);
        let mut offset = service_type_offset;
        tx.append_service_type(Section::Answer, &self.service_type, &mut offset)?;
        tx.patch_rdlength(Section::Answer, len_off);
        tx.increment_record_count(Section::Answer);

        Ok(())
    }

    pub(crate) fn prepare_response_records(
        &mut self,
        tx: &mut TxMessage,
        service_type_offset: u16,
        now: Instant,
    ) -> Result<()> {
        if !self.services_ptr.should_append_to(tx.get_type(), now) {
            return Ok(());
        }
        self.append_ptr_record_to(tx, service_type_offset, now)
    }

    pub(crate) fn update_records_state(&mut self, tx_type: TxMessageType, now: Instant) {
        self.services_ptr.update_state_after_answer(tx_type, now);
    }
}
