//! Outgoing message assembly.
//!
//! An outgoing message is built incrementally across four logical sections
//! backed by two buffers: the main buffer (header plus the primary section)
//! and an extra buffer holding the secondary section, concatenated at send
//! time. Name compression offsets are only recorded for names placed in the
//! main buffer, since extra-buffer positions shift as the main buffer grows.
//!
//! Callers snapshot the assembler before appending each top-level entry;
//! on overflow the snapshot is restored, the partial message goes out with
//! the TC flag set, and assembly restarts in a fresh packet.

use shared::error::Result;

use crate::message::name::{append_label, append_multiple_labels, append_pointer_label};
use crate::message::{
    CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH, DNSCLASS_INET, DnsType, HEADER_BIT_AA, HEADER_BIT_QR,
    HEADER_BIT_TC, HEADER_LEN,
};

pub(crate) const LOCAL_DOMAIN: &str = "local";
pub(crate) const UDP_SERVICE_LABEL: &str = "_udp";
pub(crate) const TCP_SERVICE_LABEL: &str = "_tcp";
pub(crate) const SUB_SERVICE_LABEL: &str = "_sub";
pub(crate) const SERVICES_DNSSD_LABELS: &str = "_services._dns-sd._udp";

/// Sentinel meaning "no compression offset recorded yet". Offset zero always
/// falls inside the header, so it can never be a real name offset.
pub(crate) const UNSPECIFIED_OFFSET: u16 = 0;

// The largest offset a 14-bit compression pointer can address.
const COMPRESSION_POINTER_MAX: usize = (1 << 14) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Section {
    Question,
    Answer,
    Authority,
    AdditionalData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TxMessageType {
    MulticastProbe,
    MulticastQuery,
    MulticastResponse,
    UnicastResponse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AppendOutcome {
    AppendedFullNameAsCompressed,
    AppendedLabels,
}

#[derive(Default, Clone, Copy, Debug)]
pub(crate) struct RecordCounts {
    counts: [u16; 4],
}

impl RecordCounts {
    fn index(section: Section) -> usize {
        match section {
            Section::Question => 0,
            Section::Answer => 1,
            Section::Authority => 2,
            Section::AdditionalData => 3,
        }
    }

    pub(crate) fn get(&self, section: Section) -> u16 {
        self.counts[Self::index(section)]
    }

    pub(crate) fn increment(&mut self, section: Section) {
        self.counts[Self::index(section)] += 1;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.counts.iter().all(|count| *count == 0)
    }
}

pub(crate) struct TxMessage {
    typ: TxMessageType,
    msg: Vec<u8>,
    extra_msg: Vec<u8>,
    record_counts: RecordCounts,
    saved_record_counts: RecordCounts,
    saved_msg_len: usize,
    saved_extra_len: usize,
    domain_offset: u16,
    udp_offset: u16,
    tcp_offset: u16,
    services_dnssd_offset: u16,
    truncated: bool,
    unicast_dest: Option<std::net::SocketAddr>,
    max_message_size: u16,
}

impl TxMessage {
    pub(crate) fn new(typ: TxMessageType, max_message_size: u16) -> Self {
        let mut tx = Self {
            typ,
            msg: Vec::new(),
            extra_msg: Vec::new(),
            record_counts: RecordCounts::default(),
            saved_record_counts: RecordCounts::default(),
            saved_msg_len: 0,
            saved_extra_len: 0,
            domain_offset: UNSPECIFIED_OFFSET,
            udp_offset: UNSPECIFIED_OFFSET,
            tcp_offset: UNSPECIFIED_OFFSET,
            services_dnssd_offset: UNSPECIFIED_OFFSET,
            truncated: false,
            unicast_dest: None,
            max_message_size,
        };
        tx.reinit();
        tx
    }

    pub(crate) fn new_unicast(unicast_dest: std::net::SocketAddr, max_message_size: u16) -> Self {
        let mut tx = Self::new(TxMessageType::UnicastResponse, max_message_size);
        tx.unicast_dest = Some(unicast_dest);
        tx
    }

    pub(crate) fn get_type(&self) -> TxMessageType {
        self.typ
    }

    pub(crate) fn unicast_dest(&self) -> Option<std::net::SocketAddr> {
        self.unicast_dest
    }

    /// Resets the assembler for a fresh packet. The caller is responsible
    /// for clearing the append state of any entries that were feeding the
    /// previous packet.
    pub(crate) fn reinit(&mut self) {
        self.msg.clear();
        self.msg.resize(HEADER_LEN, 0);
        self.extra_msg.clear();
        self.record_counts = RecordCounts::default();
        self.saved_record_counts = RecordCounts::default();
        self.saved_msg_len = 0;
        self.saved_extra_len = 0;
        self.domain_offset = UNSPECIFIED_OFFSET;
        self.udp_offset = UNSPECIFIED_OFFSET;
        self.tcp_offset = UNSPECIFIED_OFFSET;
        self.services_dnssd_offset = UNSPECIFIED_OFFSET;
        self.truncated = false;
    }

    // Maps a section onto the main or extra buffer based on the message
    // type. Probes carry Question+Authority, queries Question+Answer,
    // responses Answer+AdditionalData.
    fn is_main_section(&self, section: Section) -> bool {
        let main = match self.typ {
            TxMessageType::MulticastProbe | TxMessageType::MulticastQuery => Section::Question,
            TxMessageType::MulticastResponse | TxMessageType::UnicastResponse => Section::Answer,
        };
        section == main
    }

    fn buffer_for(&mut self, section: Section) -> &mut Vec<u8> {
        if self.is_main_section(section) {
            &mut self.msg
        } else {
            &mut self.extra_msg
        }
    }

    pub(crate) fn increment_record_count(&mut self, section: Section) {
        self.record_counts.increment(section);
    }

    // Saves the current buffer offset for later compression, but only for
    // names placed in the main buffer: the extra buffer is relocated when
    // the two are joined, so its offsets are not stable.
    fn save_offset(&self, compress_offset: &mut u16, section: Section) {
        if !self.is_main_section(section) {
            return;
        }
        if self.msg.len() > COMPRESSION_POINTER_MAX {
            return;
        }
        *compress_offset = self.msg.len() as u16;
    }

    pub(crate) fn append_label(
        &mut self,
        section: Section,
        label: &str,
        compress_offset: &mut u16,
    ) -> Result<AppendOutcome> {
        self.append_labels(section, label, true, compress_offset)
    }

    pub(crate) fn append_multiple_labels(
        &mut self,
        section: Section,
        labels: &str,
        compress_offset: &mut u16,
    ) -> Result<AppendOutcome> {
        self.append_labels(section, labels, false, compress_offset)
    }

    // Appends name label(s), using a compression pointer when the same name
    // was appended before. `is_single_label` keeps dots inside the label,
    // which service instance labels allow.
    fn append_labels(
        &mut self,
        section: Section,
        labels: &str,
        is_single_label: bool,
        compress_offset: &mut u16,
    ) -> Result<AppendOutcome> {
        if *compress_offset != UNSPECIFIED_OFFSET {
            let off = *compress_offset;
            append_pointer_label(self.buffer_for(section), off);
            return Ok(AppendOutcome::AppendedFullNameAsCompressed);
        }

        self.save_offset(compress_offset, section);

        let buffer = self.buffer_for(section);
        if is_single_label {
            append_label(buffer, labels)?;
        } else {
            append_multiple_labels(buffer, labels)?;
        }

        Ok(AppendOutcome::AppendedLabels)
    }

    /// Appends a service type name (e.g. `_tst._udp`), sharing the trailing
    /// `_udp`/`_tcp` label and the domain across records in the message.
    pub(crate) fn append_service_type(
        &mut self,
        section: Section,
        service_type: &str,
        compress_offset: &mut u16,
    ) -> Result<()> {
        let (labels, transport) = if let Some(stripped) = service_type.strip_suffix("._udp") {
            (stripped, Some(UDP_SERVICE_LABEL))
        } else if let Some(stripped) = service_type.strip_suffix("._tcp") {
            (stripped, Some(TCP_SERVICE_LABEL))
        } else {
            (service_type, None)
        };

        let outcome = self.append_multiple_labels(section, labels, compress_offset)?;
        if outcome == AppendOutcome::AppendedFullNameAsCompressed {
            return Ok(());
        }

        if let Some(label) = transport {
            let mut transport_offset = if label == UDP_SERVICE_LABEL {
                self.udp_offset
            } else {
                self.tcp_offset
            };
            let outcome = self.append_label(section, label, &mut transport_offset)?;
            if label == UDP_SERVICE_LABEL {
                self.udp_offset = transport_offset;
            } else {
                self.tcp_offset = transport_offset;
            }
            if outcome == AppendOutcome::AppendedFullNameAsCompressed {
                return Ok(());
            }
        }

        self.append_domain_name(section)
    }

    /// Appends the terminating `local.` domain.
    pub(crate) fn append_domain_name(&mut self, section: Section) -> Result<()> {
        if self.domain_offset != UNSPECIFIED_OFFSET {
            let off = self.domain_offset;
            append_pointer_label(self.buffer_for(section), off);
            return Ok(());
        }

        let mut offset = UNSPECIFIED_OFFSET;
        self.save_offset(&mut offset, section);
        self.domain_offset = offset;

        let buffer = self.buffer_for(section);
        append_label(buffer, LOCAL_DOMAIN)?;
        buffer.push(0);
        Ok(())
    }

    /// Appends the `_services._dns-sd._udp.local.` meta-query name.
    pub(crate) fn append_services_dnssd_name(&mut self, section: Section) -> Result<()> {
        if self.services_dnssd_offset != UNSPECIFIED_OFFSET {
            let off = self.services_dnssd_offset;
            append_pointer_label(self.buffer_for(section), off);
            return Ok(());
        }

        let mut offset = UNSPECIFIED_OFFSET;
        self.save_offset(&mut offset, section);
        self.services_dnssd_offset = offset;

        append_multiple_labels(self.buffer_for(section), SERVICES_DNSSD_LABELS)?;
        self.append_domain_name(section)
    }

    pub(crate) fn append_u16(&mut self, section: Section, value: u16) {
        self.buffer_for(section).extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn append_u32(&mut self, section: Section, value: u32) {
        self.buffer_for(section).extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn append_bytes(&mut self, section: Section, bytes: &[u8]) {
        self.buffer_for(section).extend_from_slice(bytes);
    }

    /// The record class for a record in the given section: cache-flush is
    /// set on unique records in answers, but never on probe proposals in
    /// the Authority section (and never on shared PTR records, which do not
    /// use this helper).
    pub(crate) fn unique_record_class(&self, section: Section) -> u16 {
        if section == Section::Authority {
            DNSCLASS_INET.0
        } else {
            DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH
        }
    }

    /// Appends the fixed record fields (type, class, ttl) and a length
    /// placeholder, returning the placeholder's offset for
    /// [`patch_rdlength`](Self::patch_rdlength).
    pub(crate) fn append_record_header(
        &mut self,
        section: Section,
        typ: DnsType,
        class: u16,
        ttl: u32,
    ) -> usize {
        self.append_u16(section, typ as u16);
        self.append_u16(section, class);
        self.append_u32(section, ttl);
        let len_off = self.buffer_for(section).len();
        self.append_u16(section, 0);
        len_off
    }

    /// Fixes up a record length placeholder once the record data is fully
    /// appended.
    pub(crate) fn patch_rdlength(&mut self, section: Section, len_off: usize) {
        let buffer = self.buffer_for(section);
        let rdlength = (buffer.len() - len_off - 2) as u16;
        buffer[len_off] = (rdlength >> 8) as u8;
        buffer[len_off + 1] = rdlength as u8;
    }

    pub(crate) fn is_over_size_limit(&self) -> bool {
        self.msg.len() + self.extra_msg.len() > self.max_message_size as usize
    }

    pub(crate) fn has_records(&self) -> bool {
        !self.record_counts.is_empty()
    }

    pub(crate) fn save_current_state(&mut self) {
        self.saved_record_counts = self.record_counts;
        self.saved_msg_len = self.msg.len();
        self.saved_extra_len = self.extra_msg.len();
    }

    pub(crate) fn restore_to_saved_state(&mut self) {
        self.record_counts = self.saved_record_counts;
        self.msg.truncate(self.saved_msg_len);
        self.extra_msg.truncate(self.saved_extra_len);
    }

    /// Flags the in-progress packet as a partial one; the TC bit goes out
    /// in its header and the remainder follows in a fresh packet.
    pub(crate) fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    /// Finalizes the wire bytes: writes the header flags and section counts
    /// and joins the two buffers. Returns `None` when nothing was appended.
    /// The assembler is left empty; call [`reinit`](Self::reinit) to reuse it.
    pub(crate) fn take_wire_bytes(&mut self) -> Option<Vec<u8>> {
        if self.record_counts.is_empty() {
            return None;
        }

        let mut bits = 0u16;
        match self.typ {
            TxMessageType::MulticastProbe | TxMessageType::MulticastQuery => {}
            TxMessageType::MulticastResponse | TxMessageType::UnicastResponse => {
                bits |= HEADER_BIT_QR | HEADER_BIT_AA;
            }
        }
        if self.truncated {
            bits |= HEADER_BIT_TC;
        }

        let counts = self.record_counts;
        let mut out = std::mem::take(&mut self.msg);
        out.extend_from_slice(&self.extra_msg);
        out[2..4].copy_from_slice(&bits.to_be_bytes());
        out[4..6].copy_from_slice(&counts.get(Section::Question).to_be_bytes());
        out[6..8].copy_from_slice(&counts.get(Section::Answer).to_be_bytes());
        out[8..10].copy_from_slice(&counts.get(Section::Authority).to_be_bytes());
        out[10..12].copy_from_slice(&counts.get(Section::AdditionalData).to_be_bytes());

        self.extra_msg.clear();
        self.record_counts = RecordCounts::default();

        Some(out)
    }
}
