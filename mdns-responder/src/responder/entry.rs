//! Registered entries and per-record bookkeeping.
//!
//! Every registered name is an entry: a shared header (lifecycle state,
//! probe counter, KEY record slot, NSEC scheduling, fire time) plus a
//! per-kind payload. Host entries advertise AAAA records, service entries
//! advertise PTR/SRV/TXT and sub-type PTRs. A record slot tracks its own
//! announce ladder, pending answers, and append state within the message
//! currently being assembled.

use std::net::Ipv6Addr;
use std::time::Instant;

use shared::error::Result;

use crate::config::*;
use crate::message::DnsType;
use crate::message::resource::nsec::NsecResource;
use crate::responder::tx::{
    AppendOutcome, SUB_SERVICE_LABEL, Section, TxMessage, TxMessageType, UNSPECIFIED_OFFSET,
};
use crate::responder::{Host, Key, RequestId, Service};

/// Lifecycle state of a registered entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryState {
    Probing,
    Registered,
    Conflict,
    Removing,
}

/// Parameters of a scheduled answer, derived from a received question.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AnswerInfo {
    pub(crate) question_rr_type: DnsType,
    pub(crate) answer_time: Instant,
    pub(crate) is_probe: bool,
    pub(crate) unicast_response: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AppendState {
    NotAppended,
    ToAppendInAdditionalData,
    AppendedInMulticastMsg,
    AppendedInUnicastMsg,
}

/// An aggregated earliest-deadline slot; feeding it several deadlines keeps
/// the minimum.
#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct FireTime {
    time: Option<Instant>,
}

impl FireTime {
    pub(crate) fn clear(&mut self) {
        self.time = None;
    }

    pub(crate) fn get(&self) -> Option<Instant> {
        self.time
    }

    pub(crate) fn set_earlier(&mut self, time: Instant) {
        match self.time {
            Some(current) if current <= time => {}
            _ => self.time = Some(time),
        }
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        matches!(self.time, Some(t) if t <= now)
    }
}

/// State and timing of a single advertised record (or record set, for host
/// addresses).
pub(crate) struct RecordInfo {
    is_present: bool,
    ttl: u32,
    announce_counter: u8,
    announce_time: Option<Instant>,
    multicast_answer_pending: bool,
    unicast_answer_pending: bool,
    answer_time: Option<Instant>,
    append_state: AppendState,
    append_section: Section,
    last_multicast_time: Option<Instant>,
}

impl Default for RecordInfo {
    fn default() -> Self {
        Self {
            is_present: false,
            ttl: 0,
            announce_counter: NUMBER_OF_ANNOUNCES,
            announce_time: None,
            multicast_answer_pending: false,
            unicast_answer_pending: false,
            answer_time: None,
            append_state: AppendState::NotAppended,
            append_section: Section::Answer,
            last_multicast_time: None,
        }
    }
}

impl RecordInfo {
    pub(crate) fn is_present(&self) -> bool {
        self.is_present
    }

    pub(crate) fn ttl(&self) -> u32 {
        self.ttl
    }

    pub(crate) fn clear(&mut self) {
        *self = RecordInfo::default();
    }

    /// Updates the TTL, marking the record present and restarting its
    /// announce ladder when the value changes.
    pub(crate) fn update_ttl(&mut self, ttl: u32, now: Instant) {
        if !self.is_present || self.ttl != ttl {
            self.is_present = true;
            self.ttl = ttl;
            self.start_announcing(now);
        }
    }

    /// Updates a property backing this record. The property changes hands
    /// only when the record is new or the value differs, in which case the
    /// record is re-announced.
    pub(crate) fn update_property<T: PartialEq>(&mut self, property: &mut T, value: T, now: Instant) {
        if !self.is_present || *property != value {
            self.is_present = true;
            *property = value;
            self.start_announcing(now);
        }
    }

    /// Address-list variant of [`update_property`](Self::update_property);
    /// equal sets in different order do not count as a change.
    pub(crate) fn update_addresses(
        &mut self,
        property: &mut Vec<Ipv6Addr>,
        value: Vec<Ipv6Addr>,
        now: Instant,
    ) {
        let same = self.is_present
            && property.len() == value.len()
            && value.iter().all(|addr| property.contains(addr));
        if !same {
            self.is_present = true;
            *property = value;
            self.start_announcing(now);
        }
    }

    /// Case-insensitive string variant of [`update_property`](Self::update_property)
    /// for DNS names.
    pub(crate) fn update_name_property(&mut self, property: &mut String, value: &str, now: Instant) {
        if !self.is_present || !property.eq_ignore_ascii_case(value) {
            self.is_present = true;
            *property = value.to_owned();
            self.start_announcing(now);
        }
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        if self.is_present {
            self.announce_counter = 0;
            self.announce_time = Some(now);
        }
    }

    pub(crate) fn can_answer(&self) -> bool {
        self.is_present && self.ttl > 0
    }

    pub(crate) fn schedule_answer(&mut self, info: &AnswerInfo) {
        if !self.can_answer() {
            return;
        }

        if info.unicast_response {
            self.unicast_answer_pending = true;
            return;
        }

        if !info.is_probe {
            // Rate-limiting multicasts (RFC 6762 section 6): the same
            // record is not multicast again within one second. A querier
            // that missed the previous transmission will retry.
            if let Some(elapsed) = self.duration_since_last_multicast(info.answer_time) {
                if elapsed < MIN_INTERVAL_BETWEEN_MULTICAST {
                    return;
                }
            }
        }

        if self.multicast_answer_pending {
            match self.answer_time {
                Some(t) if info.answer_time < t => {}
                _ => return,
            }
        }

        self.multicast_answer_pending = true;
        self.answer_time = Some(info.answer_time);
    }

    pub(crate) fn should_append_to(&self, tx_type: TxMessageType, now: Instant) -> bool {
        if !self.is_present {
            return false;
        }

        match tx_type {
            TxMessageType::MulticastResponse => {
                if self.announce_counter < NUMBER_OF_ANNOUNCES {
                    if let Some(t) = self.announce_time {
                        if t <= now {
                            return true;
                        }
                    }
                }
                self.multicast_answer_pending
                    && matches!(self.answer_time, Some(t) if t <= now)
            }
            TxMessageType::UnicastResponse => self.unicast_answer_pending,
            _ => false,
        }
    }

    /// Updates the slot after a response containing this record in its
    /// Answer section has been assembled.
    pub(crate) fn update_state_after_answer(&mut self, tx_type: TxMessageType, now: Instant) {
        if !self.is_present {
            return;
        }

        match tx_type {
            TxMessageType::MulticastResponse => {
                if self.append_state != AppendState::AppendedInMulticastMsg
                    || self.append_section != Section::Answer
                {
                    return;
                }

                self.multicast_answer_pending = false;

                if self.announce_counter < NUMBER_OF_ANNOUNCES {
                    self.announce_counter += 1;

                    if self.ttl == 0 {
                        // A single goodbye multicast retires the record.
                        self.is_present = false;
                    } else if self.announce_counter < NUMBER_OF_ANNOUNCES {
                        let delay = ANNOUNCE_INTERVAL * (1u32 << (self.announce_counter - 1));
                        self.announce_time = Some(now + delay);
                    }
                }
            }
            TxMessageType::UnicastResponse => {
                if !self.is_appended() || self.append_section != Section::Answer {
                    return;
                }
                self.unicast_answer_pending = false;
            }
            _ => {}
        }
    }

    /// Feeds this record's deadlines (pending announce, pending answer, and
    /// the aging of the last-multicast stamp) into the entry fire time.
    pub(crate) fn update_fire_time_on(&mut self, fire_time: &mut FireTime, now: Instant) {
        if !self.is_present {
            return;
        }

        if self.announce_counter < NUMBER_OF_ANNOUNCES {
            if let Some(t) = self.announce_time {
                fire_time.set_earlier(t);
            }
        }

        if self.multicast_answer_pending {
            if let Some(t) = self.answer_time {
                fire_time.set_earlier(t);
            }
        }

        if let Some(last) = self.last_multicast_time {
            // The last-multicast stamp ages out after ten hours; until then
            // it schedules its own expiry so stale state is dropped.
            let age_time = last + LAST_MULTICAST_AGE;
            if age_time <= now {
                self.last_multicast_time = None;
            } else {
                fire_time.set_earlier(age_time);
            }
        }
    }

    pub(crate) fn mark_as_not_appended(&mut self) {
        self.append_state = AppendState::NotAppended;
    }

    pub(crate) fn mark_as_appended(&mut self, tx_type: TxMessageType, section: Section, now: Instant) {
        self.append_section = section;

        match tx_type {
            TxMessageType::MulticastResponse | TxMessageType::MulticastProbe => {
                self.append_state = AppendState::AppendedInMulticastMsg;

                if section == Section::Answer || section == Section::AdditionalData {
                    self.last_multicast_time = Some(now);
                }
            }
            TxMessageType::UnicastResponse => {
                self.append_state = AppendState::AppendedInUnicastMsg;
            }
            TxMessageType::MulticastQuery => {}
        }
    }

    pub(crate) fn mark_to_append_in_additional_data(&mut self) {
        if self.append_state == AppendState::NotAppended {
            self.append_state = AppendState::ToAppendInAdditionalData;
        }
    }

    pub(crate) fn is_appended(&self) -> bool {
        matches!(
            self.append_state,
            AppendState::AppendedInMulticastMsg | AppendState::AppendedInUnicastMsg
        )
    }

    pub(crate) fn can_append(&self) -> bool {
        self.is_present && !self.is_appended()
    }

    pub(crate) fn should_append_in_additional_data_section(&self) -> bool {
        self.append_state == AppendState::ToAppendInAdditionalData
    }

    pub(crate) fn last_multicast_time(&self) -> Option<Instant> {
        if self.is_present {
            self.last_multicast_time
        } else {
            None
        }
    }

    /// Time since this record was last multicast; `None` when no valid
    /// stamp exists (treated as "long ago" by callers).
    pub(crate) fn duration_since_last_multicast(&self, time: Instant) -> Option<std::time::Duration> {
        if !self.is_present {
            return None;
        }
        self.last_multicast_time
            .map(|last| time.saturating_duration_since(last))
    }
}

/// The header shared by host and service entries: lifecycle state, probe
/// counter, registration callbacks, the optional KEY record, and NSEC
/// answer scheduling.
pub(crate) struct EntryInfo {
    pub(crate) state: EntryState,
    pub(crate) probe_count: u8,
    pub(crate) multicast_nsec_pending: bool,
    pub(crate) unicast_nsec_pending: bool,
    pub(crate) appended_nsec: bool,
    pub(crate) nsec_answer_time: Option<Instant>,
    pub(crate) key_record: RecordInfo,
    pub(crate) key_data: Vec<u8>,
    pub(crate) callback: Option<RequestId>,
    pub(crate) key_callback: Option<RequestId>,
    pub(crate) fire_time: FireTime,
}

impl EntryInfo {
    pub(crate) fn new(now: Instant) -> Self {
        let mut info = Self {
            state: EntryState::Probing,
            probe_count: 0,
            multicast_nsec_pending: false,
            unicast_nsec_pending: false,
            appended_nsec: false,
            nsec_answer_time: None,
            key_record: RecordInfo::default(),
            key_data: Vec::new(),
            callback: None,
            key_callback: None,
            fire_time: FireTime::default(),
        };
        info.start_probing(now);
        info
    }

    pub(crate) fn start_probing(&mut self, now: Instant) {
        self.state = EntryState::Probing;
        self.probe_count = 0;
        self.fire_time.clear();
        self.fire_time
            .set_earlier(now + random_duration(std::time::Duration::ZERO, INITIAL_PROBE_JITTER));
    }

    /// Restarts probing after losing a simultaneous-probe tiebreak: back
    /// off for a second, then probe from the beginning.
    pub(crate) fn restart_probing_after_tiebreak_loss(&mut self, now: Instant) {
        self.probe_count = 0;
        self.fire_time.clear();
        self.fire_time.set_earlier(now + PROBE_CONFLICT_WAIT_TIME);
    }

    pub(crate) fn set_state_to_conflict(&mut self) {
        if matches!(self.state, EntryState::Probing | EntryState::Registered) {
            self.state = EntryState::Conflict;
        }
    }

    pub(crate) fn register_key(&mut self, key: &Key, default_ttl: u32, request_id: RequestId, now: Instant) {
        if self.state == EntryState::Removing {
            self.start_probing(now);
        }

        let ttl = if key.ttl == 0 { default_ttl } else { key.ttl };
        self.key_record.update_ttl(ttl, now);
        self.key_record
            .update_property(&mut self.key_data, key.key_data.clone(), now);

        self.key_callback = Some(request_id);
    }

    pub(crate) fn unregister_key(&mut self, now: Instant) {
        if !self.key_record.is_present() {
            return;
        }

        self.key_callback = None;

        match self.state {
            EntryState::Registered => self.key_record.update_ttl(0, now),
            EntryState::Probing | EntryState::Conflict => self.clear_key(),
            EntryState::Removing => {}
        }
    }

    pub(crate) fn clear_key(&mut self) {
        self.key_record.clear();
        self.key_data.clear();
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.key_record.mark_as_not_appended();
        self.appended_nsec = false;
    }

    pub(crate) fn update_records_state(&mut self, tx_type: TxMessageType, now: Instant) {
        self.key_record.update_state_after_answer(tx_type, now);

        if self.appended_nsec {
            match tx_type {
                TxMessageType::MulticastResponse => self.multicast_nsec_pending = false,
                TxMessageType::UnicastResponse => self.unicast_nsec_pending = false,
                _ => {}
            }
        }
    }

    /// Schedules an NSEC answer asserting which record types this name
    /// holds; used to answer a query for a type the entry does not have.
    pub(crate) fn schedule_nsec_answer(&mut self, info: &AnswerInfo) {
        if self.state != EntryState::Registered {
            return;
        }

        if info.unicast_response {
            self.unicast_nsec_pending = true;
        } else {
            if self.multicast_nsec_pending {
                match self.nsec_answer_time {
                    Some(t) if info.answer_time < t => {}
                    _ => return,
                }
            }
            self.multicast_nsec_pending = true;
            self.nsec_answer_time = Some(info.answer_time);
        }
    }

    pub(crate) fn should_answer_nsec(&self, tx_type: TxMessageType, now: Instant) -> bool {
        match tx_type {
            TxMessageType::MulticastResponse => {
                self.multicast_nsec_pending && matches!(self.nsec_answer_time, Some(t) if t <= now)
            }
            TxMessageType::UnicastResponse => self.unicast_nsec_pending,
            _ => false,
        }
    }

    pub(crate) fn determine_next_fire_time(&mut self, now: Instant) {
        let mut fire_time = self.fire_time;
        self.key_record.update_fire_time_on(&mut fire_time, now);

        if self.multicast_nsec_pending {
            if let Some(t) = self.nsec_answer_time {
                fire_time.set_earlier(t);
            }
        }

        self.fire_time = fire_time;
    }

    /// Schedules answers for all matching records of a non-probe question,
    /// falling back to an NSEC answer when no present record matches the
    /// question type.
    pub(crate) fn answer_non_probe(info: &AnswerInfo, records: &mut [(&mut RecordInfo, DnsType)]) -> bool {
        let mut all_empty_or_zero_ttl = true;
        let mut answer_nsec = true;

        for (record, typ) in records.iter_mut() {
            if !record.can_answer() {
                continue;
            }

            all_empty_or_zero_ttl = false;

            if question_matches(info.question_rr_type, *typ) {
                answer_nsec = false;
                record.schedule_answer(info);
            }
        }

        // While all records are removed or zero TTL (goodbyes in flight),
        // no answer is given, not even NSEC.
        !all_empty_or_zero_ttl && answer_nsec
    }

    /// Schedules answers to a probe for a name we have claimed. The answer
    /// is immediate unless every answerable record was already multicast
    /// within the last 250 ms, in which case it is held back to rate-limit
    /// repeated probe defenses.
    pub(crate) fn answer_probe(info: &AnswerInfo, now: Instant, records: &mut [(&mut RecordInfo, DnsType)]) {
        let mut all_empty_or_zero_ttl = true;
        let mut any_stale = false;
        let mut answer_info = *info;
        answer_info.answer_time = now;

        for (record, _) in records.iter_mut() {
            if !record.can_answer() {
                continue;
            }

            all_empty_or_zero_ttl = false;

            if !answer_info.unicast_response {
                match record.duration_since_last_multicast(now) {
                    Some(elapsed) if elapsed < MIN_INTERVAL_PROBE_RESPONSE => {
                        if let Some(last) = record.last_multicast_time() {
                            let earliest = last + MIN_INTERVAL_PROBE_RESPONSE;
                            if earliest > answer_info.answer_time {
                                answer_info.answer_time = earliest;
                            }
                        }
                    }
                    _ => any_stale = true,
                }
            }
        }

        if all_empty_or_zero_ttl {
            // All records are removed or being removed.
            return;
        }

        if any_stale {
            answer_info.answer_time = now;
        }

        for (record, _) in records.iter_mut() {
            record.schedule_answer(&answer_info);
        }
    }
}

pub(crate) fn question_matches(question_rr_type: DnsType, rr_type: DnsType) -> bool {
    question_rr_type == rr_type || question_rr_type == DnsType::Any
}

pub(crate) fn random_duration(min: std::time::Duration, max: std::time::Duration) -> std::time::Duration {
    use rand::Rng;
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + std::time::Duration::from_millis(rand::thread_rng().gen_range(0..=span))
}

/// A registered host name with its address set.
pub(crate) struct HostEntry {
    pub(crate) info: EntryInfo,
    pub(crate) name: String,
    pub(crate) addr_record: RecordInfo,
    pub(crate) addresses: Vec<Ipv6Addr>,
    pub(crate) name_offset: u16,
}

impl HostEntry {
    pub(crate) fn new(name: &str, now: Instant) -> Self {
        Self {
            info: EntryInfo::new(now),
            name: name.to_owned(),
            addr_record: RecordInfo::default(),
            addresses: Vec::new(),
            name_offset: UNSPECIFIED_OFFSET,
        }
    }

    pub(crate) fn full_name(&self) -> String {
        format!("{}.local.", self.name)
    }

    pub(crate) fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.addr_record.is_present() && !self.info.key_record.is_present()
    }

    pub(crate) fn register_host(&mut self, host: &Host, default_ttl: u32, now: Instant) {
        if self.info.state == EntryState::Removing {
            self.info.start_probing(now);
        }

        let ttl = if host.ttl == 0 { default_ttl } else { host.ttl };
        self.addr_record.update_ttl(ttl, now);
        self.addr_record
            .update_addresses(&mut self.addresses, host.addresses.clone(), now);
    }

    pub(crate) fn unregister_host(&mut self, now: Instant) {
        if !self.addr_record.is_present() {
            return;
        }

        self.info.callback = None;

        match self.info.state {
            EntryState::Registered => self.addr_record.update_ttl(0, now),
            EntryState::Probing | EntryState::Conflict => self.clear_host(),
            EntryState::Removing => {}
        }
    }

    pub(crate) fn clear_host(&mut self) {
        self.addr_record.clear();
        self.addresses.clear();
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        self.addr_record.start_announcing(now);
        self.info.key_record.start_announcing(now);
    }

    pub(crate) fn answer_question(&mut self, info: &AnswerInfo, now: Instant) {
        if self.info.state != EntryState::Registered {
            return;
        }

        {
            let mut records = [
                (&mut self.addr_record, DnsType::Aaaa),
                (&mut self.info.key_record, DnsType::Key),
            ];

            if info.is_probe {
                EntryInfo::answer_probe(info, now, &mut records);
            } else if EntryInfo::answer_non_probe(info, &mut records) {
                self.info.schedule_nsec_answer(info);
            }
        }

        self.determine_next_fire_time(now);
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.info.clear_append_state();
        self.addr_record.mark_as_not_appended();
        self.name_offset = UNSPECIFIED_OFFSET;
    }

    pub(crate) fn determine_next_fire_time(&mut self, now: Instant) {
        if self.info.state != EntryState::Registered {
            return;
        }

        self.info.determine_next_fire_time(now);
        let mut fire_time = self.info.fire_time;
        self.addr_record.update_fire_time_on(&mut fire_time, now);
        self.info.fire_time = fire_time;
    }

    pub(crate) fn append_name_to(&mut self, tx: &mut TxMessage, section: Section) -> Result<()> {
        let outcome = tx.append_multiple_labels(section, &self.name, &mut self.name_offset)?;
        if outcome != AppendOutcome::AppendedFullNameAsCompressed {
            tx.append_domain_name(section)?;
        }
        Ok(())
    }

    pub(crate) fn append_question_to(&mut self, tx: &mut TxMessage, qu: bool) -> Result<()> {
        self.append_name_to(tx, Section::Question)?;
        tx.append_u16(Section::Question, DnsType::Any as u16);
        tx.append_u16(Section::Question, question_class(qu));
        tx.increment_record_count(Section::Question);
        Ok(())
    }

    pub(crate) fn append_address_records_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) -> Result<()> {
        if !self.addr_record.can_append() {
            return Ok(());
        }
        self.addr_record.mark_as_appended(tx.get_type(), section, now);

        for i in 0..self.addresses.len() {
            self.append_one_address_record(tx, section, i)?;
        }

        Ok(())
    }

    // Appends a single AAAA record for addresses[index]. The caller is
    // responsible for the append-state bookkeeping of the address slot.
    pub(crate) fn append_one_address_record(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        index: usize,
    ) -> Result<()> {
        let ttl = self.addr_record.ttl();
        let class = tx.unique_record_class(section);

        self.append_name_to(tx, section)?;
        tx.append_u16(section, DnsType::Aaaa as u16);
        tx.append_u16(section, class);
        tx.append_u32(section, ttl);
        tx.append_u16(section, 16);
        tx.append_bytes(section, &self.addresses[index].octets());
        tx.increment_record_count(section);

        Ok(())
    }

    pub(crate) fn append_key_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) -> Result<()> {
        if !self.info.key_record.can_append() {
            return Ok(());
        }
        self.info.key_record.mark_as_appended(tx.get_type(), section, now);

        let ttl = self.info.key_record.ttl();
        let class = tx.unique_record_class(section);

        self.append_name_to(tx, section)?;
        tx.append_u16(section, DnsType::Key as u16);
        tx.append_u16(section, class);
        tx.append_u32(section, ttl);
        tx.append_u16(section, self.info.key_data.len() as u16);
        tx.append_bytes(section, &self.info.key_data);
        tx.increment_record_count(section);

        Ok(())
    }

    pub(crate) fn append_nsec_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
    ) -> Result<()> {
        let mut types = Vec::new();
        if self.addr_record.is_present() && self.addr_record.ttl() > 0 {
            types.push(DnsType::Aaaa as u16);
        }
        if self.info.key_record.is_present() && self.info.key_record.ttl() > 0 {
            types.push(DnsType::Key as u16);
        }
        if types.is_empty() {
            return Ok(());
        }

        let class = tx.unique_record_class(section);

        self.append_name_to(tx, section)?;
        let len_off = tx.append_record_header(section, DnsType::Nsec, class, NSEC_TTL);
        self.append_name_to(tx, section)?;
        let bitmap = NsecResource {
            types,
            ..Default::default()
        }
        .type_bitmap();
        tx.append_bytes(section, &bitmap);
        tx.patch_rdlength(section, len_off);
        tx.increment_record_count(section);

        self.info.appended_nsec = true;
        Ok(())
    }

    /// The entry's proposed records in canonical form, for probe
    /// tiebreaking.
    pub(crate) fn canonical_record_set(&self) -> Vec<(u16, u16, Vec<u8>)> {
        let mut records = Vec::new();
        if self.addr_record.can_answer() {
            for addr in &self.addresses {
                records.push((1, DnsType::Aaaa as u16, addr.octets().to_vec()));
            }
        }
        if self.info.key_record.can_answer() {
            records.push((1, DnsType::Key as u16, self.info.key_data.clone()));
        }
        records.sort();
        records
    }
}

/// A sub-type of a service: a label advertised under
/// `<sub>._sub.<type>.local.` with its own PTR record.
pub(crate) struct SubType {
    pub(crate) label: String,
    pub(crate) ptr_record: RecordInfo,
    pub(crate) sub_service_name_offset: u16,
}

impl SubType {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            ptr_record: RecordInfo::default(),
            sub_service_name_offset: UNSPECIFIED_OFFSET,
        }
    }

    pub(crate) fn matches(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label)
    }
}

/// A registered service instance.
pub(crate) struct ServiceEntry {
    pub(crate) info: EntryInfo,
    pub(crate) service_instance: String,
    pub(crate) service_type: String,
    pub(crate) ptr_record: RecordInfo,
    pub(crate) srv_record: RecordInfo,
    pub(crate) txt_record: RecordInfo,
    pub(crate) sub_types: Vec<SubType>,
    pub(crate) host_name: String,
    pub(crate) txt_data: Vec<u8>,
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) port: u16,
    pub(crate) service_name_offset: u16,
    pub(crate) service_type_offset: u16,
    pub(crate) sub_service_type_offset: u16,
    pub(crate) host_name_offset: u16,
    pub(crate) is_added_in_service_types: bool,
}

const EMPTY_TXT_DATA: [u8; 1] = [0];

impl ServiceEntry {
    pub(crate) fn new(service_instance: &str, service_type: &str, now: Instant) -> Self {
        Self {
            info: EntryInfo::new(now),
            service_instance: service_instance.to_owned(),
            service_type: service_type.to_owned(),
            ptr_record: RecordInfo::default(),
            srv_record: RecordInfo::default(),
            txt_record: RecordInfo::default(),
            sub_types: Vec::new(),
            host_name: String::new(),
            txt_data: Vec::new(),
            priority: 0,
            weight: 0,
            port: 0,
            service_name_offset: UNSPECIFIED_OFFSET,
            service_type_offset: UNSPECIFIED_OFFSET,
            sub_service_type_offset: UNSPECIFIED_OFFSET,
            host_name_offset: UNSPECIFIED_OFFSET,
            is_added_in_service_types: false,
        }
    }

    pub(crate) fn full_name(&self) -> String {
        format!("{}.{}.local.", self.service_instance, self.service_type)
    }

    pub(crate) fn full_type_name(&self) -> String {
        format!("{}.local.", self.service_type)
    }

    pub(crate) fn matches_instance_and_type(&self, instance: &str, service_type: &str) -> bool {
        self.service_instance.eq_ignore_ascii_case(instance)
            && self.service_type.eq_ignore_ascii_case(service_type)
    }

    /// Matching a service type requires an answerable PTR record.
    pub(crate) fn matches_service_type(&self, full_type_name: &str) -> bool {
        self.ptr_record.can_answer() && self.full_type_name().eq_ignore_ascii_case(full_type_name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.ptr_record.is_present() && !self.info.key_record.is_present()
    }

    pub(crate) fn can_answer_sub_type(&self, sub_label: &str) -> bool {
        if !self.ptr_record.can_answer() {
            return false;
        }
        self.sub_types
            .iter()
            .any(|sub| sub.matches(sub_label) && sub.ptr_record.can_answer())
    }

    pub(crate) fn register_service(&mut self, service: &Service, default_ttl: u32, now: Instant) {
        let ttl = if service.ttl == 0 { default_ttl } else { service.ttl };

        if self.info.state == EntryState::Removing {
            self.info.start_probing(now);
        }

        // Sub-type PTRs: removed sub-types are kept with zero TTL so their
        // removal is announced before they are dropped from the list.
        for sub in self.sub_types.iter_mut() {
            let contained = service
                .sub_type_labels
                .iter()
                .any(|label| sub.matches(label));
            let sub_ttl = if contained { ttl } else { 0 };
            sub.ptr_record.update_ttl(sub_ttl, now);
        }

        for label in &service.sub_type_labels {
            if !self.sub_types.iter().any(|sub| sub.matches(label)) {
                let mut sub = SubType::new(label);
                sub.ptr_record.update_ttl(ttl, now);
                self.sub_types.push(sub);
            }
        }

        // Base PTR.
        self.ptr_record.update_ttl(ttl, now);

        // SRV record info.
        self.srv_record.update_ttl(ttl, now);
        {
            let srv = &mut self.srv_record;
            srv.update_name_property(&mut self.host_name, &service.host_name, now);
            srv.update_property(&mut self.priority, service.priority, now);
            srv.update_property(&mut self.weight, service.weight, now);
            srv.update_property(&mut self.port, service.port, now);
        }

        // TXT record info.
        self.txt_record.update_ttl(ttl, now);
        let txt_data = if service.txt_data.is_empty() {
            EMPTY_TXT_DATA.to_vec()
        } else {
            service.txt_data.clone()
        };
        self.txt_record
            .update_property(&mut self.txt_data, txt_data, now);
    }

    pub(crate) fn unregister_service(&mut self, now: Instant) {
        if !self.ptr_record.is_present() {
            return;
        }

        self.info.callback = None;

        match self.info.state {
            EntryState::Registered => {
                for sub in self.sub_types.iter_mut() {
                    sub.ptr_record.update_ttl(0, now);
                }
                self.ptr_record.update_ttl(0, now);
                self.srv_record.update_ttl(0, now);
                self.txt_record.update_ttl(0, now);
            }
            EntryState::Probing | EntryState::Conflict => self.clear_service(),
            EntryState::Removing => {}
        }
    }

    pub(crate) fn clear_service(&mut self) {
        self.ptr_record.clear();
        self.srv_record.clear();
        self.txt_record.clear();
        self.sub_types.clear();
        self.host_name.clear();
        self.txt_data.clear();
    }

    pub(crate) fn remove_empty_sub_types(&mut self) {
        self.sub_types.retain(|sub| sub.ptr_record.is_present());
    }

    pub(crate) fn start_announcing(&mut self, now: Instant) {
        for sub in self.sub_types.iter_mut() {
            sub.ptr_record.start_announcing(now);
        }
        self.ptr_record.start_announcing(now);
        self.srv_record.start_announcing(now);
        self.txt_record.start_announcing(now);
        self.info.key_record.start_announcing(now);
    }

    pub(crate) fn answer_service_name_question(&mut self, info: &AnswerInfo, now: Instant) {
        if self.info.state != EntryState::Registered {
            return;
        }

        {
            let mut records = [
                (&mut self.srv_record, DnsType::Srv),
                (&mut self.txt_record, DnsType::Txt),
                (&mut self.info.key_record, DnsType::Key),
            ];

            if info.is_probe {
                EntryInfo::answer_probe(info, now, &mut records);
            } else if EntryInfo::answer_non_probe(info, &mut records) {
                self.info.schedule_nsec_answer(info);
            }
        }

        self.determine_next_fire_time(now);
    }

    pub(crate) fn answer_service_type_question(
        &mut self,
        info: &AnswerInfo,
        sub_label: Option<&str>,
        now: Instant,
    ) {
        if self.info.state != EntryState::Registered {
            return;
        }

        match sub_label {
            None => self.ptr_record.schedule_answer(info),
            Some(label) => {
                if let Some(sub) = self.sub_types.iter_mut().find(|sub| sub.matches(label)) {
                    sub.ptr_record.schedule_answer(info);
                }
            }
        }

        self.determine_next_fire_time(now);
    }

    /// Whether a known answer with the given TTL suppresses our PTR answer:
    /// the querier's cached TTL must be at least half the record's value.
    pub(crate) fn should_suppress_known_answer(&self, ttl: u32, sub_label: Option<&str>) -> bool {
        let our_ttl = match sub_label {
            None => self.ptr_record.ttl(),
            Some(label) => match self.sub_types.iter().find(|sub| sub.matches(label)) {
                Some(sub) => sub.ptr_record.ttl(),
                None => return false,
            },
        };
        (ttl as u64) * 2 >= our_ttl as u64
    }

    pub(crate) fn clear_append_state(&mut self) {
        self.info.clear_append_state();

        self.ptr_record.mark_as_not_appended();
        self.srv_record.mark_as_not_appended();
        self.txt_record.mark_as_not_appended();

        self.service_name_offset = UNSPECIFIED_OFFSET;
        self.service_type_offset = UNSPECIFIED_OFFSET;
        self.sub_service_type_offset = UNSPECIFIED_OFFSET;
        self.host_name_offset = UNSPECIFIED_OFFSET;

        for sub in self.sub_types.iter_mut() {
            sub.ptr_record.mark_as_not_appended();
            sub.sub_service_name_offset = UNSPECIFIED_OFFSET;
        }
    }

    pub(crate) fn update_records_state(&mut self, tx_type: TxMessageType, now: Instant) {
        self.info.update_records_state(tx_type, now);

        self.ptr_record.update_state_after_answer(tx_type, now);
        self.srv_record.update_state_after_answer(tx_type, now);
        self.txt_record.update_state_after_answer(tx_type, now);

        for sub in self.sub_types.iter_mut() {
            sub.ptr_record.update_state_after_answer(tx_type, now);
        }

        self.remove_empty_sub_types();

        if self.is_empty() {
            self.info.state = EntryState::Removing;
        }
    }

    pub(crate) fn determine_next_fire_time(&mut self, now: Instant) {
        if self.info.state != EntryState::Registered {
            return;
        }

        self.info.determine_next_fire_time(now);
        let mut fire_time = self.info.fire_time;

        self.ptr_record.update_fire_time_on(&mut fire_time, now);
        self.srv_record.update_fire_time_on(&mut fire_time, now);
        self.txt_record.update_fire_time_on(&mut fire_time, now);

        for sub in self.sub_types.iter_mut() {
            sub.ptr_record.update_fire_time_on(&mut fire_time, now);
        }

        self.info.fire_time = fire_time;
    }

    pub(crate) fn append_service_name_to(&mut self, tx: &mut TxMessage, section: Section) -> Result<()> {
        let outcome = tx.append_label(section, &self.service_instance, &mut self.service_name_offset)?;
        if outcome != AppendOutcome::AppendedFullNameAsCompressed {
            self.append_service_type_to(tx, section)?;
        }
        Ok(())
    }

    pub(crate) fn append_service_type_to(&mut self, tx: &mut TxMessage, section: Section) -> Result<()> {
        tx.append_service_type(section, &self.service_type, &mut self.service_type_offset)
    }

    fn append_sub_service_type_to(&mut self, tx: &mut TxMessage, section: Section) -> Result<()> {
        let outcome = tx.append_label(section, SUB_SERVICE_LABEL, &mut self.sub_service_type_offset)?;
        if outcome != AppendOutcome::AppendedFullNameAsCompressed {
            self.append_service_type_to(tx, section)?;
        }
        Ok(())
    }

    fn append_sub_service_name_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        sub_index: usize,
    ) -> Result<()> {
        let outcome = {
            let sub = &mut self.sub_types[sub_index];
            tx.append_label(section, &sub.label, &mut sub.sub_service_name_offset)?
        };
        if outcome != AppendOutcome::AppendedFullNameAsCompressed {
            self.append_sub_service_type_to(tx, section)?;
        }
        Ok(())
    }

    pub(crate) fn append_host_name_to(&mut self, tx: &mut TxMessage, section: Section) -> Result<()> {
        let outcome = tx.append_multiple_labels(section, &self.host_name, &mut self.host_name_offset)?;
        if outcome != AppendOutcome::AppendedFullNameAsCompressed {
            tx.append_domain_name(section)?;
        }
        Ok(())
    }

    pub(crate) fn append_question_to(&mut self, tx: &mut TxMessage, qu: bool) -> Result<()> {
        self.append_service_name_to(tx, Section::Question)?;
        tx.append_u16(Section::Question, DnsType::Any as u16);
        tx.append_u16(Section::Question, question_class(qu));
        tx.increment_record_count(Section::Question);
        Ok(())
    }

    pub(crate) fn append_srv_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) -> Result<()> {
        if !self.srv_record.can_append() {
            return Ok(());
        }
        self.srv_record.mark_as_appended(tx.get_type(), section, now);

        let ttl = self.srv_record.ttl();
        let class = tx.unique_record_class(section);

        self.append_service_name_to(tx, section)?;
        let len_off = tx.append_record_header(section, DnsType::Srv, class, ttl);
        tx.append_u16(section, self.priority);
        tx.append_u16(section, self.weight);
        tx.append_u16(section, self.port);
        self.append_host_name_to(tx, section)?;
        tx.patch_rdlength(section, len_off);
        tx.increment_record_count(section);

        Ok(())
    }

    pub(crate) fn append_txt_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) -> Result<()> {
        if !self.txt_record.can_append() {
            return Ok(());
        }
        self.txt_record.mark_as_appended(tx.get_type(), section, now);

        let ttl = self.txt_record.ttl();
        let class = tx.unique_record_class(section);

        self.append_service_name_to(tx, section)?;
        tx.append_u16(section, DnsType::Txt as u16);
        tx.append_u16(section, class);
        tx.append_u32(section, ttl);
        tx.append_u16(section, self.txt_data.len() as u16);
        tx.append_bytes(section, &self.txt_data);
        tx.increment_record_count(section);

        Ok(())
    }

    /// Appends the PTR record for the base service type, or for the given
    /// sub-type. PTR records are shared, so the cache-flush bit is never
    /// set on them.
    pub(crate) fn append_ptr_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        sub_index: Option<usize>,
        now: Instant,
    ) -> Result<()> {
        let ttl = {
            let record = match sub_index {
                None => &mut self.ptr_record,
                Some(i) => &mut self.sub_types[i].ptr_record,
            };
            if !record.can_append() {
                return Ok(());
            }
            record.mark_as_appended(tx.get_type(), section, now);
            record.ttl()
        };

        match sub_index {
            None => self.append_service_type_to(tx, section)?,
            Some(i) => self.append_sub_service_name_to(tx, section, i)?,
        }
        let len_off = tx.append_record_header(section, DnsType::Ptr, 1, ttl);
        self.append_service_name_to(tx, section)?;
        tx.patch_rdlength(section, len_off);
        tx.increment_record_count(section);

        Ok(())
    }

    pub(crate) fn append_key_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
        now: Instant,
    ) -> Result<()> {
        if !self.info.key_record.can_append() {
            return Ok(());
        }
        self.info.key_record.mark_as_appended(tx.get_type(), section, now);

        let ttl = self.info.key_record.ttl();
        let class = tx.unique_record_class(section);

        self.append_service_name_to(tx, section)?;
        tx.append_u16(section, DnsType::Key as u16);
        tx.append_u16(section, class);
        tx.append_u32(section, ttl);
        tx.append_u16(section, self.info.key_data.len() as u16);
        tx.append_bytes(section, &self.info.key_data);
        tx.increment_record_count(section);

        Ok(())
    }

    pub(crate) fn append_nsec_record_to(
        &mut self,
        tx: &mut TxMessage,
        section: Section,
    ) -> Result<()> {
        let mut types = Vec::new();
        if self.srv_record.is_present() && self.srv_record.ttl() > 0 {
            types.push(DnsType::Srv as u16);
        }
        if self.txt_record.is_present() && self.txt_record.ttl() > 0 {
            types.push(DnsType::Txt as u16);
        }
        if self.info.key_record.is_present() && self.info.key_record.ttl() > 0 {
            types.push(DnsType::Key as u16);
        }
        if types.is_empty() {
            return Ok(());
        }

        let class = tx.unique_record_class(section);

        self.append_service_name_to(tx, section)?;
        let len_off = tx.append_record_header(section, DnsType::Nsec, class, NSEC_TTL);
        self.append_service_name_to(tx, section)?;
        let bitmap = NsecResource {
            types,
            ..Default::default()
        }
        .type_bitmap();
        tx.append_bytes(section, &bitmap);
        tx.patch_rdlength(section, len_off);
        tx.increment_record_count(section);

        self.info.appended_nsec = true;
        Ok(())
    }

    /// The entry's proposed records in canonical form, for probe
    /// tiebreaking.
    pub(crate) fn canonical_record_set(&self) -> Vec<(u16, u16, Vec<u8>)> {
        use crate::message::name::Name;
        use crate::message::resource::srv::SrvResource;
        use crate::message::resource::{ResourceBody, txt::TxtResource};

        let mut records = Vec::new();
        if self.srv_record.can_answer() {
            let srv = ResourceBody::Srv(SrvResource {
                priority: self.priority,
                weight: self.weight,
                port: self.port,
                target: Name {
                    data: format!("{}.local.", self.host_name),
                },
            });
            records.push((1, DnsType::Srv as u16, srv.canonical_rdata()));
        }
        if self.txt_record.can_answer() {
            let txt = ResourceBody::Txt(TxtResource {
                data: self.txt_data.clone(),
            });
            records.push((1, DnsType::Txt as u16, txt.canonical_rdata()));
        }
        if self.info.key_record.can_answer() {
            records.push((1, DnsType::Key as u16, self.info.key_data.clone()));
        }
        records.sort();
        records
    }
}

fn question_class(qu: bool) -> u16 {
    use crate::message::{CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH, DNSCLASS_INET};
    if qu {
        DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH
    } else {
        DNSCLASS_INET.0
    }
}
