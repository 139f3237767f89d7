//! Sans-I/O mDNS responder core.
//!
//! The [`Responder`] owns every registered name and drives it through the
//! RFC 6762 lifecycle: probe the name on the link, announce it once
//! claimed, answer queries from the multicast group, defend it against
//! conflicting claims, and retire it with a goodbye announcement.
//!
//! No I/O happens here. Incoming datagrams are fed in with
//! [`handle_read`](shared::Protocol::handle_read), outgoing packets are
//! drained with [`poll_write`](shared::Protocol::poll_write), the single
//! timer deadline is read with [`poll_timeout`](shared::Protocol::poll_timeout)
//! and serviced with [`handle_timeout`](shared::Protocol::handle_timeout),
//! and registration outcomes and name conflicts surface as
//! [`ResponderEvent`]s via [`poll_event`](shared::Protocol::poll_event).
//! Events are only observable after the triggering call returns, so a
//! registration outcome never re-enters the caller.

pub(crate) mod entry;
pub(crate) mod history;
pub(crate) mod multipacket;
pub(crate) mod service_types;
pub(crate) mod tx;

#[cfg(test)]
mod responder_test;

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use bytes::BytesMut;

use shared::error::{Error, Result};
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportMessage, TransportProtocol};

use crate::config::*;
use crate::message::resource::{Resource, ResourceBody};
use crate::message::{DnsType, Message, RCode};
use entry::{
    AnswerInfo, EntryInfo, EntryState, FireTime, HostEntry, ServiceEntry, question_matches,
    random_duration,
};
use history::TxMessageHistory;
use multipacket::MultiPacketRxMessages;
use service_types::ServiceTypeEntry;
use tx::{Section, TxMessage, TxMessageType, UNSPECIFIED_OFFSET};

/// The IPv6 link-local mDNS multicast group (ff02::fb).
pub const MDNS_MULTICAST_IPV6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// The standard mDNS port (5353).
pub const MDNS_PORT: u16 = 5353;

/// mDNS multicast destination address (`[ff02::fb]:5353`).
///
/// Multicast packets returned by `poll_write()` carry this as their peer
/// address.
pub const MDNS_DEST_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V6(MDNS_MULTICAST_IPV6), MDNS_PORT);

/// The reserved owner name whose PTR set enumerates all service types on
/// the node.
pub(crate) const ALL_SERVICES_NAME: &str = "_services._dns-sd._udp.local.";

/// Identifier correlating a register request with its
/// [`ResponderEvent::Registered`] outcome.
pub type RequestId = u32;

/// A host registration: a host label (no domain) and its IPv6 addresses.
///
/// Registering an existing host name updates it; newly added addresses are
/// announced and removed ones get goodbye announcements. Registering with
/// an empty address list unregisters the host. A zero `ttl` selects the
/// configured default.
#[derive(Clone, Debug, Default)]
pub struct Host {
    pub host_name: String,
    pub addresses: Vec<Ipv6Addr>,
    pub ttl: u32,
}

/// A service registration.
///
/// `service_instance` is a single DNS label (it may itself contain dots);
/// `service_type` is dot-separated labels such as `_tst._udp`, without the
/// domain. `txt_data` carries already-encoded TXT record data; empty data
/// is advertised as a single zero byte. Re-registering the same
/// (instance, type) updates the entry, announcing changed records and
/// sending goodbyes for removed sub-types.
#[derive(Clone, Debug, Default)]
pub struct Service {
    pub service_instance: String,
    pub service_type: String,
    pub host_name: String,
    pub sub_type_labels: Vec<String>,
    pub txt_data: Vec<u8>,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub ttl: u32,
}

/// A KEY record registration.
///
/// With `service_type: None` the key attaches to the host entry named
/// `name`; otherwise it attaches to the service entry
/// `<name>.<service_type>`.
#[derive(Clone, Debug, Default)]
pub struct Key {
    pub name: String,
    pub service_type: Option<String>,
    pub key_data: Vec<u8>,
    pub ttl: u32,
}

/// Outcome of a register request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The name was successfully claimed (probing completed without
    /// conflict).
    Success,
    /// The name is already claimed by another responder on the link.
    Duplicated,
}

/// Events emitted by the responder, drained via
/// [`poll_event`](shared::Protocol::poll_event).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponderEvent {
    /// Reports the outcome of a `register_*` call. Guaranteed to be
    /// emitted after the call returns, even when registration succeeds
    /// immediately.
    Registered {
        request_id: RequestId,
        outcome: RegisterOutcome,
    },
    /// Another responder claimed a name we had successfully registered.
    /// `service_type` is set when the conflicting name belongs to a
    /// service entry.
    Conflict {
        name: String,
        service_type: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum QuestionTarget {
    None,
    Host(usize),
    ServiceName(usize),
    ServiceType {
        first: usize,
        sub_label: Option<String>,
    },
    AllServices,
}

// A question of a received query, with the state accumulated while
// processing it.
struct RxQuestion {
    name: String,
    rr_type: DnsType,
    is_rr_class_internet: bool,
    unicast_response: bool,
    is_probe: bool,

    can_answer: bool,
    is_unique: bool,
    target: QuestionTarget,
}

impl RxQuestion {
    fn reset_process_state(&mut self) {
        self.can_answer = false;
        self.is_unique = false;
        self.target = QuestionTarget::None;
    }
}

// A parsed received message.
pub(crate) struct RxMessage {
    msg: Message,
    pub(crate) sender: SocketAddr,
    pub(crate) truncated: bool,
    is_query: bool,
    questions: Vec<RxQuestion>,
}

enum ProcessOutcome {
    Processed,
    SaveAsMultiPacket,
}

/// Sans-I/O mDNS responder.
///
/// Create it disabled, enable it with [`set_enabled`](Responder::set_enabled),
/// register names, and run the usual sans-I/O event loop around it:
///
/// ```rust
/// use mdns_responder::{Responder, ResponderConfig, Host, ResponderEvent};
/// use shared::Protocol;
/// use std::time::Instant;
///
/// let mut responder = Responder::new(ResponderConfig::default());
/// responder.set_enabled(true).unwrap();
///
/// responder
///     .register_host(
///         Host {
///             host_name: "myhost".to_string(),
///             addresses: vec!["fd00::1".parse().unwrap()],
///             ttl: 0,
///         },
///         1,
///     )
///     .unwrap();
///
/// // Probing starts shortly; drive the deadline to emit the first probe.
/// let deadline = responder.poll_timeout().expect("probe scheduled");
/// responder.handle_timeout(deadline).unwrap();
/// let probe = responder.poll_write().expect("probe packet queued");
/// assert_eq!(probe.transport.peer_addr.to_string(), "[ff02::fb]:5353");
/// ```
pub struct Responder {
    config: ResponderConfig,

    enabled: bool,
    closed: bool,
    question_unicast_allowed: bool,
    max_message_size: u16,

    host_entries: Vec<HostEntry>,
    service_entries: Vec<ServiceEntry>,
    service_types: Vec<ServiceTypeEntry>,

    multi_packet: MultiPacketRxMessages,
    tx_history: TxMessageHistory,

    // The single timer all per-entry fire times are folded into.
    entry_fire_time: FireTime,

    write_outs: VecDeque<TaggedBytesMut>,
    event_outs: VecDeque<ResponderEvent>,
}

impl Responder {
    /// Creates a responder. It starts disabled; no names can be registered
    /// and all received traffic is ignored until
    /// [`set_enabled`](Responder::set_enabled) is called.
    pub fn new(config: ResponderConfig) -> Self {
        let question_unicast_allowed = config.question_unicast_allowed;
        let max_message_size = config.max_message_size;
        Self {
            config,
            enabled: false,
            closed: false,
            question_unicast_allowed,
            max_message_size,
            host_entries: Vec::new(),
            service_entries: Vec::new(),
            service_types: Vec::new(),
            multi_packet: MultiPacketRxMessages::default(),
            tx_history: TxMessageHistory::default(),
            entry_fire_time: FireTime::default(),
            write_outs: VecDeque::new(),
            event_outs: VecDeque::new(),
        }
    }

    /// Enables or disables the responder.
    ///
    /// Disabling immediately stops all operation and drops every registered
    /// entry without goodbye announcements or outcome events.
    ///
    /// # Errors
    ///
    /// `ErrAlready` when already in the requested state,
    /// `ErrConnectionClosed` after [`close`](shared::Protocol::close).
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if enabled == self.enabled {
            return Err(Error::ErrAlready);
        }

        self.enabled = enabled;

        if enabled {
            log::info!("mDNS responder enabled");
        } else {
            log::info!("mDNS responder disabled");
            self.host_entries.clear();
            self.service_entries.clear();
            self.service_types.clear();
            self.multi_packet.clear();
            self.tx_history.clear();
            self.entry_fire_time.clear();
            self.write_outs.clear();
        }

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Allows or forbids "QU" questions (requesting unicast responses) on
    /// the first probe of each entry.
    pub fn set_question_unicast_allowed(&mut self, allowed: bool) {
        self.question_unicast_allowed = allowed;
    }

    pub fn is_question_unicast_allowed(&self) -> bool {
        self.question_unicast_allowed
    }

    /// Sets the outgoing message size threshold. Mainly intended for
    /// testing message splitting.
    pub fn set_max_message_size(&mut self, max_size: u16) {
        self.max_message_size = if max_size == 0 {
            self.config.max_message_size
        } else {
            max_size
        };
    }

    /// Registers or updates a host entry. See [`Host`].
    ///
    /// The outcome is reported asynchronously as
    /// [`ResponderEvent::Registered`] carrying `request_id`.
    pub fn register_host(&mut self, host: Host, request_id: RequestId) -> Result<()> {
        self.ensure_operational()?;
        validate_name(&host.host_name)?;

        let now = Instant::now();
        let i = match self
            .host_entries
            .iter()
            .position(|e| e.matches_name(&host.host_name))
        {
            Some(i) => i,
            None => {
                self.host_entries.push(HostEntry::new(&host.host_name, now));
                self.host_entries.len() - 1
            }
        };

        {
            let e = &mut self.host_entries[i];
            e.info.callback = Some(request_id);

            if host.addresses.is_empty() {
                // A host registered with no addresses stops being
                // advertised, announcing removal of the old addresses.
                e.unregister_host(now);
            } else {
                let default_ttl = self.config.default_ttl;
                e.register_host(&host, default_ttl, now);
            }

            e.determine_next_fire_time(now);
        }

        self.remove_host_if_empty(i);
        self.arm_timer_from_host(i);
        self.flush_entry_task();
        Ok(())
    }

    /// Unregisters a host, sending goodbye announcements for its records
    /// if it had been claimed. Unknown names are ignored.
    pub fn unregister_host(&mut self, host_name: &str) -> Result<()> {
        self.ensure_operational()?;

        let now = Instant::now();
        if let Some(i) = self
            .host_entries
            .iter()
            .position(|e| e.matches_name(host_name))
        {
            self.host_entries[i].unregister_host(now);
            self.host_entries[i].determine_next_fire_time(now);
            self.remove_host_if_empty(i);
            self.arm_timer_from_host(i);
        }

        self.flush_entry_task();
        Ok(())
    }

    /// Registers or updates a service entry. See [`Service`].
    pub fn register_service(&mut self, service: Service, request_id: RequestId) -> Result<()> {
        self.ensure_operational()?;
        validate_name(&service.service_instance)?;
        validate_name(&service.service_type)?;
        validate_name(&service.host_name)?;
        for label in &service.sub_type_labels {
            validate_name(label)?;
        }

        let now = Instant::now();
        let i = match self.service_entries.iter().position(|e| {
            e.matches_instance_and_type(&service.service_instance, &service.service_type)
        }) {
            Some(i) => i,
            None => {
                self.service_entries.push(ServiceEntry::new(
                    &service.service_instance,
                    &service.service_type,
                    now,
                ));
                self.service_entries.len() - 1
            }
        };

        {
            let e = &mut self.service_entries[i];
            e.info.callback = Some(request_id);
            let default_ttl = self.config.default_ttl;
            e.register_service(&service, default_ttl, now);
            e.determine_next_fire_time(now);
        }

        self.update_service_types(i, now);
        self.arm_timer_from_service(i);
        self.flush_entry_task();
        Ok(())
    }

    /// Unregisters a service, sending goodbye announcements for all its
    /// records if it had been claimed. Unknown names are ignored.
    pub fn unregister_service(&mut self, service_instance: &str, service_type: &str) -> Result<()> {
        self.ensure_operational()?;

        let now = Instant::now();
        if let Some(i) = self
            .service_entries
            .iter()
            .position(|e| e.matches_instance_and_type(service_instance, service_type))
        {
            self.service_entries[i].unregister_service(now);
            self.service_entries[i].determine_next_fire_time(now);
            self.update_service_types(i, now);
            self.remove_service_if_empty(i);
            self.arm_timer_from_service(i);
        }

        self.flush_entry_task();
        Ok(())
    }

    /// Registers or updates a KEY record under a host or service name. See
    /// [`Key`].
    pub fn register_key(&mut self, key: Key, request_id: RequestId) -> Result<()> {
        self.ensure_operational()?;
        validate_name(&key.name)?;

        let now = Instant::now();
        let default_ttl = self.config.default_ttl;

        match &key.service_type {
            Some(service_type) => {
                validate_name(service_type)?;
                let i = match self
                    .service_entries
                    .iter()
                    .position(|e| e.matches_instance_and_type(&key.name, service_type))
                {
                    Some(i) => i,
                    None => {
                        self.service_entries
                            .push(ServiceEntry::new(&key.name, service_type, now));
                        self.service_entries.len() - 1
                    }
                };
                self.service_entries[i]
                    .info
                    .register_key(&key, default_ttl, request_id, now);
                self.service_entries[i].determine_next_fire_time(now);
                self.arm_timer_from_service(i);
            }
            None => {
                let i = match self
                    .host_entries
                    .iter()
                    .position(|e| e.matches_name(&key.name))
                {
                    Some(i) => i,
                    None => {
                        self.host_entries.push(HostEntry::new(&key.name, now));
                        self.host_entries.len() - 1
                    }
                };
                self.host_entries[i]
                    .info
                    .register_key(&key, default_ttl, request_id, now);
                self.host_entries[i].determine_next_fire_time(now);
                self.arm_timer_from_host(i);
            }
        }

        self.flush_entry_task();
        Ok(())
    }

    /// Unregisters a KEY record, sending a goodbye for it if it had been
    /// claimed. Unknown names are ignored.
    pub fn unregister_key(&mut self, name: &str, service_type: Option<&str>) -> Result<()> {
        self.ensure_operational()?;

        let now = Instant::now();
        match service_type {
            Some(service_type) => {
                if let Some(i) = self
                    .service_entries
                    .iter()
                    .position(|e| e.matches_instance_and_type(name, service_type))
                {
                    self.service_entries[i].info.unregister_key(now);
                    self.service_entries[i].determine_next_fire_time(now);
                    self.remove_service_if_empty(i);
                    self.arm_timer_from_service(i);
                }
            }
            None => {
                if let Some(i) = self.host_entries.iter().position(|e| e.matches_name(name)) {
                    self.host_entries[i].info.unregister_key(now);
                    self.host_entries[i].determine_next_fire_time(now);
                    self.remove_host_if_empty(i);
                    self.arm_timer_from_host(i);
                }
            }
        }

        self.flush_entry_task();
        Ok(())
    }

    fn ensure_operational(&self) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if !self.enabled {
            return Err(Error::ErrInvalidState);
        }
        Ok(())
    }

    fn remove_host_if_empty(&mut self, i: usize) {
        let e = &mut self.host_entries[i];
        if e.is_empty() && e.info.state != EntryState::Registered {
            e.info.state = EntryState::Removing;
        }
    }

    fn remove_service_if_empty(&mut self, i: usize) {
        let e = &mut self.service_entries[i];
        e.remove_empty_sub_types();
        if e.is_empty() && e.info.state != EntryState::Registered {
            e.info.state = EntryState::Removing;
        }
    }

    fn arm_timer_from_host(&mut self, i: usize) {
        if let Some(t) = self.host_entries[i].info.fire_time.get() {
            self.entry_fire_time.set_earlier(t);
        }
    }

    fn arm_timer_from_service(&mut self, i: usize) {
        if let Some(t) = self.service_entries[i].info.fire_time.get() {
            self.entry_fire_time.set_earlier(t);
        }
    }

    // Emits registration-outcome events for entries whose probing has
    // resolved, then drops finished entries. Runs at the end of each entry
    // point (public call, rx, or timer), which keeps callbacks out of the
    // processing paths and guarantees register outcomes are observed only
    // after the register call has returned.
    fn flush_entry_task(&mut self) {
        for e in self.host_entries.iter_mut() {
            Self::invoke_entry_callbacks(&mut e.info, &mut self.event_outs);
        }
        for e in self.service_entries.iter_mut() {
            Self::invoke_entry_callbacks(&mut e.info, &mut self.event_outs);
        }

        // Conflicted entries self-destruct once reported; removing entries
        // have finished their goodbyes (or never needed any).
        self.host_entries
            .retain(|e| !matches!(e.info.state, EntryState::Removing | EntryState::Conflict));
        self.service_entries
            .retain(|e| !matches!(e.info.state, EntryState::Removing | EntryState::Conflict));
    }

    fn invoke_entry_callbacks(info: &mut EntryInfo, events: &mut VecDeque<ResponderEvent>) {
        let outcome = match info.state {
            EntryState::Conflict => RegisterOutcome::Duplicated,
            EntryState::Registered => RegisterOutcome::Success,
            EntryState::Probing | EntryState::Removing => return,
        };

        if let Some(request_id) = info.key_callback.take() {
            events.push_back(ResponderEvent::Registered {
                request_id,
                outcome,
            });
        }
        if let Some(request_id) = info.callback.take() {
            events.push_back(ResponderEvent::Registered {
                request_id,
                outcome,
            });
        }
    }

    // Maintains the service-type aggregator list for service entry `i`: a
    // type is represented while at least one registered entry can answer
    // its PTR, and the aggregator holds the count of such entries.
    fn update_service_types(&mut self, i: usize, now: Instant) {
        let should_add = {
            let e = &self.service_entries[i];
            e.info.state == EntryState::Registered && e.ptr_record.can_answer()
        };

        if should_add == self.service_entries[i].is_added_in_service_types {
            return;
        }
        self.service_entries[i].is_added_in_service_types = should_add;

        let type_name = self.service_entries[i].service_type.clone();
        let pos = self.service_types.iter().position(|st| st.matches(&type_name));

        if should_add {
            let ti = match pos {
                Some(ti) => ti,
                None => {
                    let st = ServiceTypeEntry::new(&type_name, now);
                    if let Some(t) = st.fire_time.get() {
                        self.entry_fire_time.set_earlier(t);
                    }
                    self.service_types.push(st);
                    self.service_types.len() - 1
                }
            };
            self.service_types[ti].num_entries += 1;
        } else if let Some(ti) = pos {
            self.service_types[ti].num_entries -= 1;
            if self.service_types[ti].num_entries == 0 {
                self.service_types.remove(ti);
            }
        }
    }

    //------------------------------------------------------------------
    // Timer handling

    fn handle_entry_timer(&mut self, now: Instant) {
        let mut probe = TxMessage::new(TxMessageType::MulticastProbe, self.max_message_size);
        let mut response = TxMessage::new(TxMessageType::MulticastResponse, self.max_message_size);
        let mut next_time = FireTime::default();

        // Hosts are processed before services so a service entry can see
        // whether its host's addresses were already placed in the Answer
        // section, preventing duplicates in Additional Data.
        for i in 0..self.host_entries.len() {
            self.host_handle_timer(i, now, &mut probe, &mut response, &mut next_time);
        }
        for i in 0..self.service_entries.len() {
            self.service_handle_timer(i, now, &mut probe, &mut response, &mut next_time);
        }
        for i in 0..self.service_types.len() {
            self.service_type_handle_timer(i, now, &mut response, &mut next_time);
        }

        self.send_tx_message(&mut probe, now);
        self.send_tx_message(&mut response, now);

        if let Some(t) = next_time.get() {
            self.entry_fire_time.set_earlier(t);
        }
    }

    fn host_handle_timer(
        &mut self,
        i: usize,
        now: Instant,
        probe: &mut TxMessage,
        response: &mut TxMessage,
        next_time: &mut FireTime,
    ) {
        {
            let e = &mut self.host_entries[i];
            e.clear_append_state();

            if !e.info.fire_time.is_due(now) {
                if let Some(t) = e.info.fire_time.get() {
                    next_time.set_earlier(t);
                }
                return;
            }
            e.info.fire_time.clear();
        }

        match self.host_entries[i].info.state {
            EntryState::Probing => {
                if self.host_entries[i].info.probe_count < NUMBER_OF_PROBES {
                    {
                        let e = &mut self.host_entries[i];
                        e.info.probe_count += 1;
                        e.info.fire_time.set_earlier(now + PROBE_WAIT_TIME);
                    }
                    self.host_prepare_probe(i, probe, now);
                } else {
                    {
                        let e = &mut self.host_entries[i];
                        e.info.state = EntryState::Registered;
                        e.start_announcing(now);
                    }
                    self.host_prepare_response(i, response, now);
                }
            }
            EntryState::Registered => self.host_prepare_response(i, response, now),
            EntryState::Conflict | EntryState::Removing => {}
        }

        let e = &mut self.host_entries[i];
        e.determine_next_fire_time(now);
        if let Some(t) = e.info.fire_time.get() {
            next_time.set_earlier(t);
        }
    }

    fn service_handle_timer(
        &mut self,
        i: usize,
        now: Instant,
        probe: &mut TxMessage,
        response: &mut TxMessage,
        next_time: &mut FireTime,
    ) {
        {
            let e = &mut self.service_entries[i];
            e.clear_append_state();

            if !e.info.fire_time.is_due(now) {
                if let Some(t) = e.info.fire_time.get() {
                    next_time.set_earlier(t);
                }
                return;
            }
            e.info.fire_time.clear();
        }

        match self.service_entries[i].info.state {
            EntryState::Probing => {
                if self.service_entries[i].info.probe_count < NUMBER_OF_PROBES {
                    {
                        let e = &mut self.service_entries[i];
                        e.info.probe_count += 1;
                        e.info.fire_time.set_earlier(now + PROBE_WAIT_TIME);
                    }
                    self.service_prepare_probe(i, probe, now);
                } else {
                    {
                        let e = &mut self.service_entries[i];
                        e.info.state = EntryState::Registered;
                        e.start_announcing(now);
                    }
                    self.update_service_types(i, now);
                    self.service_prepare_response(i, response, now);
                }
            }
            EntryState::Registered => self.service_prepare_response(i, response, now),
            EntryState::Conflict | EntryState::Removing => {}
        }

        let e = &mut self.service_entries[i];
        e.determine_next_fire_time(now);
        if let Some(t) = e.info.fire_time.get() {
            next_time.set_earlier(t);
        }
    }

    fn service_type_handle_timer(
        &mut self,
        i: usize,
        now: Instant,
        response: &mut TxMessage,
        next_time: &mut FireTime,
    ) {
        {
            let st = &mut self.service_types[i];
            st.clear_append_state();

            if !st.fire_time.is_due(now) {
                if let Some(t) = st.fire_time.get() {
                    next_time.set_earlier(t);
                }
                return;
            }
            st.fire_time.clear();
        }

        self.service_type_prepare_response(i, response, now);

        let st = &mut self.service_types[i];
        st.update_fire_time(now);
        if let Some(t) = st.fire_time.get() {
            next_time.set_earlier(t);
        }
    }

    //------------------------------------------------------------------
    // Message preparation

    fn host_prepare_probe(&mut self, i: usize, probe: &mut TxMessage, now: Instant) {
        let qu = self.host_entries[i].info.probe_count == 1 && self.question_unicast_allowed;

        let mut prepare_again = false;
        loop {
            probe.save_current_state();

            let result = {
                let e = &mut self.host_entries[i];
                e.append_question_to(probe, qu)
                    .and_then(|_| e.append_address_records_to(probe, Section::Authority, now))
                    .and_then(|_| e.append_key_record_to(probe, Section::Authority, now))
            };
            if let Err(err) = result {
                log::error!("failed to build probe: {err}");
                probe.restore_to_saved_state();
                return;
            }

            if !self.check_size_limit_to_prepare_again(probe, &mut prepare_again, now) {
                break;
            }
        }
    }

    fn host_prepare_response(&mut self, i: usize, response: &mut TxMessage, now: Instant) {
        let tx_type = response.get_type();
        let mut appended_addresses = false;

        // Address records split across packets when they do not all fit;
        // each packet carries whole records. Their answer accounting runs
        // right away, since a later overflow flush would clear the append
        // marks before the final bookkeeping pass.
        if self.host_entries[i].addr_record.should_append_to(tx_type, now) {
            match self.host_append_address_records_split(i, response, now) {
                Ok(()) => {
                    appended_addresses = true;
                    self.host_entries[i]
                        .addr_record
                        .update_state_after_answer(tx_type, now);
                }
                Err(err) => {
                    log::error!("failed to build response: {err}");
                    response.restore_to_saved_state();
                }
            }
        }

        let mut prepare_again = false;
        loop {
            response.save_current_state();

            let result = {
                let e = &mut self.host_entries[i];
                let mut append_nsec = appended_addresses;
                let mut build = || -> Result<()> {
                    if e.info.key_record.should_append_to(tx_type, now) {
                        e.append_key_record_to(response, Section::Answer, now)?;
                        append_nsec = true;
                    }
                    if append_nsec || e.info.should_answer_nsec(tx_type, now) {
                        e.append_nsec_record_to(response, Section::AdditionalData)?;
                    }
                    Ok(())
                };
                build()
            };
            if let Err(err) = result {
                log::error!("failed to build response: {err}");
                response.restore_to_saved_state();
                break;
            }

            if !self.check_size_limit_to_prepare_again(response, &mut prepare_again, now) {
                break;
            }
        }

        let e = &mut self.host_entries[i];
        e.info.update_records_state(tx_type, now);
        if e.is_empty() {
            e.info.state = EntryState::Removing;
        }
    }

    // Appends the host's AAAA records one at a time, flushing the packet
    // (with TC set) and continuing in a fresh one whenever the next record
    // does not fit. A single record larger than the cap goes out oversized
    // rather than not at all.
    fn host_append_address_records_split(
        &mut self,
        i: usize,
        tx: &mut TxMessage,
        now: Instant,
    ) -> Result<()> {
        let tx_type = tx.get_type();

        if !self.host_entries[i].addr_record.can_append() {
            return Ok(());
        }
        self.host_entries[i]
            .addr_record
            .mark_as_appended(tx_type, Section::Answer, now);

        let mut index = 0;
        while index < self.host_entries[i].addresses.len() {
            tx.save_current_state();
            self.host_entries[i].append_one_address_record(tx, Section::Answer, index)?;

            if tx.is_over_size_limit() {
                tx.restore_to_saved_state();

                if tx.has_records() {
                    tx.mark_truncated();
                    self.send_tx_message(tx, now);
                    tx.reinit();
                    self.clear_append_states_on_reinit(tx_type);
                    // The flush cleared this entry's append state; restore
                    // it and retry the same record in the new packet.
                    self.host_entries[i]
                        .addr_record
                        .mark_as_appended(tx_type, Section::Answer, now);
                    continue;
                }

                self.host_entries[i].append_one_address_record(tx, Section::Answer, index)?;
            }

            index += 1;
        }

        Ok(())
    }

    fn service_prepare_probe(&mut self, i: usize, probe: &mut TxMessage, now: Instant) {
        let qu = self.service_entries[i].info.probe_count == 1 && self.question_unicast_allowed;

        let mut prepare_again = false;
        loop {
            probe.save_current_state();

            self.service_discover_offsets_and_host(i);

            let result = {
                let e = &mut self.service_entries[i];
                e.append_question_to(probe, qu)
                    .and_then(|_| e.append_srv_record_to(probe, Section::Authority, now))
                    .and_then(|_| e.append_txt_record_to(probe, Section::Authority, now))
                    .and_then(|_| e.append_key_record_to(probe, Section::Authority, now))
            };
            if let Err(err) = result {
                log::error!("failed to build probe: {err}");
                probe.restore_to_saved_state();
                return;
            }

            if !self.check_size_limit_to_prepare_again(probe, &mut prepare_again, now) {
                break;
            }
        }
    }

    fn service_prepare_response(&mut self, i: usize, response: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            response.save_current_state();

            if let Err(err) = self.service_prepare_response_records(i, response, now) {
                log::error!("failed to build response: {err}");
                response.restore_to_saved_state();
                return;
            }

            if !self.check_size_limit_to_prepare_again(response, &mut prepare_again, now) {
                break;
            }
        }

        self.service_entries[i].update_records_state(response.get_type(), now);
    }

    // Builds the response records for service entry `i`, selecting
    // Additional Data records per RFC 6763 section 12: SRV, TXT, and host
    // addresses alongside a PTR answer; host addresses alongside an SRV
    // answer. Records already in the Answer section are not duplicated,
    // and Additional Data records never force message splitting on their
    // own (they are simply dropped when the primary records fit).
    fn service_prepare_response_records(
        &mut self,
        i: usize,
        tx: &mut TxMessage,
        now: Instant,
    ) -> Result<()> {
        let tx_type = tx.get_type();
        let mut append_nsec = false;

        let host_idx = self.service_discover_offsets_and_host(i);

        if self.service_entries[i].ptr_record.should_append_to(tx_type, now) {
            self.service_entries[i].append_ptr_record_to(tx, Section::Answer, None, now)?;

            if self.service_entries[i].ptr_record.ttl() > 0 {
                let e = &mut self.service_entries[i];
                e.srv_record.mark_to_append_in_additional_data();
                e.txt_record.mark_to_append_in_additional_data();

                if let Some(hi) = host_idx {
                    self.host_entries[hi]
                        .addr_record
                        .mark_to_append_in_additional_data();
                }
            }
        }

        for si in 0..self.service_entries[i].sub_types.len() {
            if self.service_entries[i].sub_types[si]
                .ptr_record
                .should_append_to(tx_type, now)
            {
                self.service_entries[i].append_ptr_record_to(tx, Section::Answer, Some(si), now)?;
            }
        }

        if self.service_entries[i].srv_record.should_append_to(tx_type, now) {
            self.service_entries[i].append_srv_record_to(tx, Section::Answer, now)?;
            append_nsec = true;

            if self.service_entries[i].srv_record.ttl() > 0 {
                if let Some(hi) = host_idx {
                    self.host_entries[hi]
                        .addr_record
                        .mark_to_append_in_additional_data();
                }
            }
        }

        if self.service_entries[i].txt_record.should_append_to(tx_type, now) {
            self.service_entries[i].append_txt_record_to(tx, Section::Answer, now)?;
            append_nsec = true;
        }

        if self.service_entries[i]
            .info
            .key_record
            .should_append_to(tx_type, now)
        {
            self.service_entries[i].append_key_record_to(tx, Section::Answer, now)?;
            append_nsec = true;
        }

        // Additional Data section.

        if self.service_entries[i]
            .srv_record
            .should_append_in_additional_data_section()
        {
            self.service_entries[i].append_srv_record_to(tx, Section::AdditionalData, now)?;
        }

        if self.service_entries[i]
            .txt_record
            .should_append_in_additional_data_section()
        {
            self.service_entries[i].append_txt_record_to(tx, Section::AdditionalData, now)?;
        }

        if let Some(hi) = host_idx {
            if self.host_entries[hi]
                .addr_record
                .should_append_in_additional_data_section()
            {
                self.host_entries[hi].append_address_records_to(tx, Section::AdditionalData, now)?;
            }
        }

        if append_nsec || self.service_entries[i].info.should_answer_nsec(tx_type, now) {
            self.service_entries[i].append_nsec_record_to(tx, Section::AdditionalData)?;
        }

        Ok(())
    }

    // Finds the host entry backing service entry `i` (same lifecycle state
    // only, so both feed the same message type) and adopts name
    // compression offsets already recorded by that host or by service
    // entries appended earlier in the current message.
    fn service_discover_offsets_and_host(&mut self, i: usize) -> Option<usize> {
        let host_idx = {
            let e = &self.service_entries[i];
            self.host_entries
                .iter()
                .position(|h| h.matches_name(&e.host_name) && h.info.state == e.info.state)
        };

        if let Some(hi) = host_idx {
            let name_offset = self.host_entries[hi].name_offset;
            update_compress_offset(&mut self.service_entries[i].host_name_offset, name_offset);
        }

        // Entries after `i` have not been processed yet, so only earlier
        // entries can have usable offsets.
        let (earlier, rest) = self.service_entries.split_at_mut(i);
        let e = &mut rest[0];

        for other in earlier.iter() {
            if other.info.state != e.info.state {
                continue;
            }

            if other.host_name.eq_ignore_ascii_case(&e.host_name) {
                update_compress_offset(&mut e.host_name_offset, other.host_name_offset);
            }

            if other.service_type.eq_ignore_ascii_case(&e.service_type) {
                update_compress_offset(&mut e.service_type_offset, other.service_type_offset);

                if e.info.state == EntryState::Probing {
                    // Sub-type names do not appear in probe messages.
                    continue;
                }

                update_compress_offset(
                    &mut e.sub_service_type_offset,
                    other.sub_service_type_offset,
                );

                for sub in e.sub_types.iter_mut() {
                    if let Some(other_sub) =
                        other.sub_types.iter().find(|s| s.matches(&sub.label))
                    {
                        update_compress_offset(
                            &mut sub.sub_service_name_offset,
                            other_sub.sub_service_name_offset,
                        );
                    }
                }
            }
        }

        host_idx
    }

    fn service_type_prepare_response(&mut self, i: usize, tx: &mut TxMessage, now: Instant) {
        let mut prepare_again = false;
        loop {
            tx.save_current_state();

            // Reuse the type-name offset if a registered service entry of
            // this type already appended it in the current message.
            let service_type_offset = {
                let st = &self.service_types[i];
                let mut offset = UNSPECIFIED_OFFSET;
                for e in self.service_entries.iter() {
                    if e.info.state != EntryState::Registered {
                        continue;
                    }
                    if st.matches(&e.service_type) && e.service_type_offset != UNSPECIFIED_OFFSET {
                        offset = e.service_type_offset;
                        break;
                    }
                }
                offset
            };

            if let Err(err) =
                self.service_types[i].prepare_response_records(tx, service_type_offset, now)
            {
                log::error!("failed to build response: {err}");
                tx.restore_to_saved_state();
                return;
            }

            if !self.check_size_limit_to_prepare_again(tx, &mut prepare_again, now) {
                break;
            }
        }

        self.service_types[i].update_records_state(tx.get_type(), now);
    }

    // On overflow: roll back to the last per-entry checkpoint, send the
    // partial message with TC set, and reinitialize for a second (and
    // final) preparation pass. An entry whose own records exceed the size
    // limit is always kept whole in a single message.
    fn check_size_limit_to_prepare_again(
        &mut self,
        tx: &mut TxMessage,
        prepare_again: &mut bool,
        now: Instant,
    ) -> bool {
        if *prepare_again {
            *prepare_again = false;
            return false;
        }

        if !tx.is_over_size_limit() {
            return false;
        }

        *prepare_again = true;

        tx.restore_to_saved_state();
        tx.mark_truncated();
        self.send_tx_message(tx, now);
        tx.reinit();
        self.clear_append_states_on_reinit(tx.get_type());

        true
    }

    fn clear_append_states_on_reinit(&mut self, tx_type: TxMessageType) {
        fn should_clear(state: EntryState, tx_type: TxMessageType) -> bool {
            match state {
                EntryState::Probing => tx_type == TxMessageType::MulticastProbe,
                EntryState::Registered => matches!(
                    tx_type,
                    TxMessageType::MulticastResponse | TxMessageType::UnicastResponse
                ),
                EntryState::Conflict | EntryState::Removing => true,
            }
        }

        for e in self.host_entries.iter_mut() {
            if should_clear(e.info.state, tx_type) {
                e.clear_append_state();
            }
        }
        for e in self.service_entries.iter_mut() {
            if should_clear(e.info.state, tx_type) {
                e.clear_append_state();
            }
        }
        if matches!(
            tx_type,
            TxMessageType::MulticastResponse | TxMessageType::UnicastResponse
        ) {
            for st in self.service_types.iter_mut() {
                st.clear_append_state();
            }
        }
    }

    fn send_tx_message(&mut self, tx: &mut TxMessage, now: Instant) {
        let peer_addr = tx.unicast_dest().unwrap_or(MDNS_DEST_ADDR);

        if let Some(bytes) = tx.take_wire_bytes() {
            self.tx_history.add(&bytes, now);

            log::trace!("queuing {} byte mDNS message to {peer_addr}", bytes.len());
            self.write_outs.push_back(TransportMessage {
                now,
                transport: TransportContext {
                    local_addr: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), MDNS_PORT),
                    peer_addr,
                    transport_protocol: TransportProtocol::UDP,
                },
                message: BytesMut::from(&bytes[..]),
            });
        }
    }

    //------------------------------------------------------------------
    // Rx processing

    fn parse_rx_message(
        &self,
        bytes: &[u8],
        sender: SocketAddr,
        is_unicast: bool,
    ) -> Result<RxMessage> {
        let mut msg = Message::default();
        msg.unpack(bytes)?;

        // RFC 6762 section 18: OPCODE must be zero (standard query) and
        // messages with a non-zero RCODE are silently ignored.
        if msg.header.op_code != 0 {
            return Err(Error::ErrUnsupportedOpCode);
        }
        if msg.header.rcode != RCode::Success {
            return Err(Error::ErrBadResponseCode);
        }

        let is_query = !msg.header.response;

        if sender.port() != MDNS_PORT {
            // Queries from another source port are legacy unicast queries
            // (RFC 6762 section 6.7), which are not supported; responses
            // not sourced from the mDNS port are invalid.
            return Err(Error::ErrNotCapable);
        }

        if is_unicast && is_query {
            // Direct unicast queries to port 5353 (RFC 6762 section 5.5)
            // are not supported.
            return Err(Error::ErrNotCapable);
        }

        let questions = msg
            .questions
            .iter()
            .map(|q| RxQuestion {
                name: q.name.data.clone(),
                rr_type: q.typ,
                is_rr_class_internet: q.class.is_internet_or_any(),
                unicast_response: q.class.top_bit(),
                // A probe carries the proposed records for the questioned
                // name in its Authority section.
                is_probe: msg
                    .authorities
                    .iter()
                    .any(|r| r.header.name.matches(&q.name.data)),
                can_answer: false,
                is_unique: false,
                target: QuestionTarget::None,
            })
            .collect();

        let truncated = msg.header.truncated;

        Ok(RxMessage {
            msg,
            sender,
            truncated,
            is_query,
            questions,
        })
    }

    fn process_query(
        &mut self,
        head: &mut RxMessage,
        rest: &[RxMessage],
        should_process_truncated: bool,
        now: Instant,
    ) -> ProcessOutcome {
        let mut should_delay = false;
        let mut can_answer = false;
        let mut need_unicast_response = false;

        for qi in 0..head.questions.len() {
            head.questions[qi].reset_process_state();
            self.process_question(head, qi, now);

            let q = &head.questions[qi];

            // A response may go out immediately only when every question
            // is answerable from unique records we own; anything else gets
            // the random response delay.
            if !q.can_answer || !q.is_unique {
                should_delay = true;
            }

            if q.can_answer {
                can_answer = true;
                if q.unicast_response {
                    need_unicast_response = true;
                }
            }
        }

        if !can_answer {
            return ProcessOutcome::Processed;
        }

        if head.truncated && !should_process_truncated {
            return ProcessOutcome::SaveAsMultiPacket;
        }

        let mut answer_time = now;
        if should_delay {
            answer_time += random_duration(MIN_RESPONSE_DELAY, MAX_RESPONSE_DELAY);
        }

        for qi in 0..head.questions.len() {
            self.answer_question(head, qi, rest, answer_time, now);
        }

        if need_unicast_response {
            self.send_unicast_response(head.sender, now);
        }

        ProcessOutcome::Processed
    }

    fn process_question(&mut self, head: &mut RxMessage, qi: usize, now: Instant) {
        let (name, rr_type, is_probe) = {
            let q = &head.questions[qi];
            if !q.is_rr_class_internet {
                return;
            }
            (q.name.clone(), q.rr_type, q.is_probe)
        };

        // The all-services meta-query.
        if name.eq_ignore_ascii_case(ALL_SERVICES_NAME) {
            if !question_matches(rr_type, DnsType::Ptr) || self.service_types.is_empty() {
                return;
            }
            let q = &mut head.questions[qi];
            q.can_answer = true;
            q.target = QuestionTarget::AllServices;
            return;
        }

        // A host entry name?
        if let Some(hi) = self
            .host_entries
            .iter()
            .position(|h| h.full_name().eq_ignore_ascii_case(&name))
        {
            match self.host_entries[hi].info.state {
                EntryState::Probing => {
                    if is_probe {
                        let ours = self.host_entries[hi].canonical_record_set();
                        if probe_tiebreak_lost(&ours, &head.msg, &name) {
                            log::debug!("lost probe tiebreak for {name}, restarting probes");
                            self.host_entries[hi].info.restart_probing_after_tiebreak_loss(now);
                            self.arm_timer_from_host(hi);
                        }
                    }
                }
                EntryState::Registered => {
                    let q = &mut head.questions[qi];
                    q.can_answer = true;
                    q.is_unique = true;
                    q.target = QuestionTarget::Host(hi);
                }
                EntryState::Conflict | EntryState::Removing => {}
            }
            return;
        }

        // A service instance name?
        if let Some(si) = self
            .service_entries
            .iter()
            .position(|s| s.full_name().eq_ignore_ascii_case(&name))
        {
            match self.service_entries[si].info.state {
                EntryState::Probing => {
                    if is_probe {
                        let ours = self.service_entries[si].canonical_record_set();
                        if probe_tiebreak_lost(&ours, &head.msg, &name) {
                            log::debug!("lost probe tiebreak for {name}, restarting probes");
                            self.service_entries[si]
                                .info
                                .restart_probing_after_tiebreak_loss(now);
                            self.arm_timer_from_service(si);
                        }
                    }
                }
                EntryState::Registered => {
                    let q = &mut head.questions[qi];
                    q.can_answer = true;
                    q.is_unique = true;
                    q.target = QuestionTarget::ServiceName(si);
                }
                EntryState::Conflict | EntryState::Removing => {}
            }
            return;
        }

        // A service type or sub-type. Several service entries can match;
        // the first one is saved and answering starts from there.
        if !question_matches(rr_type, DnsType::Ptr) {
            return;
        }

        let (sub_label, base_name) = parse_sub_type_name(&name);

        for si in 0..self.service_entries.len() {
            let s = &self.service_entries[si];
            if s.info.state != EntryState::Registered || !s.matches_service_type(&base_name) {
                continue;
            }
            if let Some(label) = &sub_label {
                if !s.can_answer_sub_type(label) {
                    continue;
                }
            }

            let q = &mut head.questions[qi];
            q.can_answer = true;
            q.target = QuestionTarget::ServiceType {
                first: si,
                sub_label,
            };
            return;
        }
    }

    fn answer_question(
        &mut self,
        head: &RxMessage,
        qi: usize,
        rest: &[RxMessage],
        answer_time: Instant,
        now: Instant,
    ) {
        let q = &head.questions[qi];
        if !q.can_answer {
            return;
        }

        let info = AnswerInfo {
            question_rr_type: q.rr_type,
            answer_time,
            is_probe: q.is_probe,
            unicast_response: q.unicast_response,
        };

        match q.target.clone() {
            QuestionTarget::None => {}
            QuestionTarget::AllServices => {
                self.answer_all_services_question(head, rest, qi, &info, now);
            }
            QuestionTarget::Host(hi) => {
                self.host_entries[hi].answer_question(&info, now);
                self.arm_timer_from_host(hi);
            }
            QuestionTarget::ServiceName(si) => {
                self.service_entries[si].answer_service_name_question(&info, now);
                self.arm_timer_from_service(si);
            }
            QuestionTarget::ServiceType { first, sub_label } => {
                self.answer_service_type_question(
                    head,
                    rest,
                    qi,
                    first,
                    sub_label.as_deref(),
                    &info,
                    now,
                );
            }
        }
    }

    fn answer_service_type_question(
        &mut self,
        head: &RxMessage,
        rest: &[RxMessage],
        qi: usize,
        first: usize,
        sub_label: Option<&str>,
        info: &AnswerInfo,
        now: Instant,
    ) {
        let question_name = head.questions[qi].name.clone();
        let (_, base_name) = parse_sub_type_name(&question_name);

        for si in first..self.service_entries.len() {
            {
                let s = &self.service_entries[si];
                if s.info.state != EntryState::Registered || !s.matches_service_type(&base_name) {
                    continue;
                }
                if let Some(label) = sub_label {
                    if !s.can_answer_sub_type(label) {
                        continue;
                    }
                }
            }

            // Known-answer suppression, checked across every packet of a
            // multi-packet query.
            let full_name = self.service_entries[si].full_name();
            let mut suppress = false;
            for msg in std::iter::once(&head.msg).chain(rest.iter().map(|rx| &rx.msg)) {
                if let Some(ttl) = find_known_answer_ttl(msg, &question_name, &full_name) {
                    if self.service_entries[si].should_suppress_known_answer(ttl, sub_label) {
                        suppress = true;
                        break;
                    }
                }
            }

            if !suppress {
                self.service_entries[si].answer_service_type_question(info, sub_label, now);
                self.arm_timer_from_service(si);
            }
        }
    }

    fn answer_all_services_question(
        &mut self,
        head: &RxMessage,
        rest: &[RxMessage],
        qi: usize,
        info: &AnswerInfo,
        now: Instant,
    ) {
        let question_name = head.questions[qi].name.clone();

        for ti in 0..self.service_types.len() {
            let full_type_name = self.service_types[ti].full_type_name();

            let mut suppress = false;
            for msg in std::iter::once(&head.msg).chain(rest.iter().map(|rx| &rx.msg)) {
                if let Some(ttl) = find_known_answer_ttl(msg, &question_name, &full_type_name) {
                    if self.service_types[ti].should_suppress_known_answer(ttl) {
                        suppress = true;
                        break;
                    }
                }
            }

            if !suppress {
                self.service_types[ti].answer_question(info, now);
                if let Some(t) = self.service_types[ti].fire_time.get() {
                    self.entry_fire_time.set_earlier(t);
                }
            }
        }
    }

    // Builds and queues the unicast response for "QU" questions answered
    // in this rx pass. Unlike multicast answers, these are not delayed.
    fn send_unicast_response(&mut self, dest: SocketAddr, now: Instant) {
        let mut response = TxMessage::new_unicast(dest, self.max_message_size);

        for i in 0..self.host_entries.len() {
            self.host_entries[i].clear_append_state();
            self.host_prepare_response(i, &mut response, now);
        }
        for i in 0..self.service_entries.len() {
            self.service_entries[i].clear_append_state();
            self.service_prepare_response(i, &mut response, now);
        }
        for i in 0..self.service_types.len() {
            self.service_types[i].clear_append_state();
            self.service_type_prepare_response(i, &mut response, now);
        }

        self.send_tx_message(&mut response, now);
    }

    // Scans a received response for records claiming names we own.
    fn process_response(&mut self, rx: &RxMessage, now: Instant) {
        for record in rx.msg.answers.iter().chain(rx.msg.additionals.iter()) {
            if record.header.class.base() != 1 {
                continue;
            }
            if record.header.ttl == 0 {
                continue;
            }

            let name = record.header.name.data.clone();

            if let Some(hi) = self
                .host_entries
                .iter()
                .position(|h| h.full_name().eq_ignore_ascii_case(&name))
            {
                if host_record_conflicts(&self.host_entries[hi], record) {
                    self.host_handle_conflict(hi, now);
                }
            }

            if let Some(si) = self
                .service_entries
                .iter()
                .position(|s| s.full_name().eq_ignore_ascii_case(&name))
            {
                if service_record_conflicts(&self.service_entries[si], record) {
                    self.service_handle_conflict(si, now);
                }
            }
        }
    }

    fn host_handle_conflict(&mut self, hi: usize, _now: Instant) {
        let old_state = self.host_entries[hi].info.state;
        self.host_entries[hi].info.set_state_to_conflict();

        if old_state == EntryState::Registered {
            let name = self.host_entries[hi].name.clone();
            log::info!("conflict detected for host {name}");
            self.event_outs.push_back(ResponderEvent::Conflict {
                name,
                service_type: None,
            });
        }
    }

    fn service_handle_conflict(&mut self, si: usize, now: Instant) {
        let old_state = self.service_entries[si].info.state;
        self.service_entries[si].info.set_state_to_conflict();
        self.update_service_types(si, now);

        if old_state == EntryState::Registered {
            let name = self.service_entries[si].service_instance.clone();
            let service_type = self.service_entries[si].service_type.clone();
            log::info!("conflict detected for service {name}.{service_type}");
            self.event_outs.push_back(ResponderEvent::Conflict {
                name,
                service_type: Some(service_type),
            });
        }
    }
}

impl Protocol<TaggedBytesMut, (), ()> for Responder {
    type Rout = ();
    type Wout = TaggedBytesMut;
    type Eout = ResponderEvent;
    type Error = Error;
    type Time = Instant;

    /// Processes a received mDNS datagram.
    ///
    /// Queries may schedule (possibly delayed) multicast answers, trigger
    /// an immediate unicast response for "QU" questions, or join a
    /// multi-packet bundle when truncated. Responses are checked for
    /// records conflicting with our registered names. Our own looped-back
    /// transmissions are recognized and dropped.
    fn handle_read(&mut self, tagged: TaggedBytesMut) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if !self.enabled {
            return Ok(());
        }

        let now = tagged.now;
        let sender = tagged.transport.peer_addr;

        // Messages we multicast are delivered back to us; the tx history
        // digest identifies and drops them.
        if self.tx_history.contains(&tagged.message) {
            log::trace!("dropping self-originated message");
            return Ok(());
        }

        let dest_ip = tagged.transport.local_addr.ip();
        let is_unicast = match dest_ip {
            IpAddr::V6(ip) => !ip.is_multicast() && !ip.is_unspecified(),
            IpAddr::V4(ip) => !ip.is_multicast() && !ip.is_unspecified(),
        };

        let rx = match self.parse_rx_message(&tagged.message, sender, is_unicast) {
            Ok(rx) => rx,
            Err(err) => {
                log::info!("failed to parse message from {sender}: {err}");
                return Ok(());
            }
        };

        if rx.is_query {
            if rx.questions.is_empty() && !rx.msg.answers.is_empty() {
                // A continuation of a multi-packet query: no questions,
                // known answers only.
                self.multi_packet.add_to_existing(rx, now);
            } else {
                let mut rx = rx;
                match self.process_query(&mut rx, &[], false, now) {
                    ProcessOutcome::Processed => {}
                    ProcessOutcome::SaveAsMultiPacket => {
                        // A truncated query we could answer: wait for its
                        // known-answer continuation packets before
                        // responding.
                        self.multi_packet.add_new(rx, now);
                    }
                }
            }
        } else {
            self.process_response(&rx, now);
        }

        self.flush_entry_task();
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    /// Returns the next packet to put on the wire. Multicast packets carry
    /// [`MDNS_DEST_ADDR`] as their peer address; unicast responses carry
    /// the querier's address.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_outs.pop_front()
    }

    fn handle_event(&mut self, _evt: ()) -> Result<()> {
        Ok(())
    }

    /// Returns the next [`ResponderEvent`], if any.
    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    /// Runs all time-driven work that is due at `now`: probe and announce
    /// transmissions, coalesced answers, multi-packet query settlement,
    /// and tx-history expiry.
    fn handle_timeout(&mut self, now: Self::Time) -> Result<()> {
        if self.closed {
            return Err(Error::ErrConnectionClosed);
        }
        if !self.enabled {
            return Ok(());
        }

        if self.entry_fire_time.is_due(now) {
            self.entry_fire_time.clear();
            self.handle_entry_timer(now);
        }

        for bundle in self.multi_packet.take_expired(now) {
            let mut messages = bundle.rx_messages;
            if messages.is_empty() {
                continue;
            }
            let rest = messages.split_off(1);
            let mut head = messages.remove(0);
            self.process_query(&mut head, &rest, true, now);
        }

        self.tx_history.remove_expired(now);

        self.flush_entry_task();
        Ok(())
    }

    /// The next deadline at which [`handle_timeout`](Responder::handle_timeout)
    /// should run, or `None` when no timed work is pending.
    fn poll_timeout(&mut self) -> Option<Self::Time> {
        if self.closed || !self.enabled {
            return None;
        }

        let mut fire_time = FireTime::default();
        if let Some(t) = self.entry_fire_time.get() {
            fire_time.set_earlier(t);
        }
        if let Some(t) = self.multi_packet.next_fire_time() {
            fire_time.set_earlier(t);
        }
        if let Some(t) = self.tx_history.next_fire_time() {
            fire_time.set_earlier(t);
        }
        fire_time.get()
    }

    /// Shuts the responder down, dropping all entries, queued packets, and
    /// pending events. Further operations fail with `ErrConnectionClosed`.
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.enabled = false;
        self.host_entries.clear();
        self.service_entries.clear();
        self.service_types.clear();
        self.multi_packet.clear();
        self.tx_history.clear();
        self.entry_fire_time.clear();
        self.write_outs.clear();
        self.event_outs.clear();
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ErrInvalidArgs);
    }
    if name.len() + ".local.".len() > 255 {
        return Err(Error::ErrInvalidArgs);
    }
    Ok(())
}

fn update_compress_offset(offset: &mut u16, new_offset: u16) {
    if *offset == UNSPECIFIED_OFFSET && new_offset != UNSPECIFIED_OFFSET {
        *offset = new_offset;
    }
}

// Splits a question name of the form `<sub>._sub.<type>.local.` into the
// sub label and the base type name; other names are returned unchanged with
// no sub label.
fn parse_sub_type_name(name: &str) -> (Option<String>, String) {
    match name.find("._sub.") {
        Some(pos) => (
            Some(name[..pos].to_string()),
            name[pos + "._sub.".len()..].to_string(),
        ),
        None => (None, name.to_string()),
    }
}

// Finds a known-answer PTR in the query's Answer section whose owner is
// `question_name` and whose target is `target_name`, returning its TTL.
fn find_known_answer_ttl(msg: &Message, question_name: &str, target_name: &str) -> Option<u32> {
    for record in &msg.answers {
        if !record.header.name.matches(question_name) {
            continue;
        }
        if let ResourceBody::Ptr(ptr) = &record.body {
            if ptr.ptr.matches(target_name) {
                return Some(record.header.ttl);
            }
        }
    }
    None
}

// RFC 6762 section 8.2.1 simultaneous-probe tiebreak: both proposed record
// sets are compared in canonical form, sorted by (class, type, rdata);
// the lexicographically greater set wins the name.
fn probe_tiebreak_lost(
    ours: &[(u16, u16, Vec<u8>)],
    msg: &Message,
    name: &str,
) -> bool {
    let mut theirs: Vec<(u16, u16, Vec<u8>)> = msg
        .authorities
        .iter()
        .filter(|r| r.header.name.matches(name) && r.header.class.base() == 1)
        .map(|r| {
            (
                r.header.class.base(),
                r.header.typ as u16,
                r.body.canonical_rdata(),
            )
        })
        .collect();
    theirs.sort();

    theirs.as_slice() > ours
}

// Conflict rules for a received record claiming a host entry's name: while
// probing, any record data not matching ours is a conflict; once
// registered, only records asserting uniqueness (cache-flush) with
// different data conflict. PTR records are shared and never conflict, and
// NSEC assertions are ignored.
fn host_record_conflicts(host: &HostEntry, record: &Resource) -> bool {
    let matches_ours = match &record.body {
        ResourceBody::Aaaa(aaaa) => {
            host.addr_record.can_answer() && host.addresses.contains(&aaaa.addr())
        }
        ResourceBody::Key(key) => {
            host.info.key_record.can_answer() && host.info.key_data == key.data
        }
        ResourceBody::Ptr(_) | ResourceBody::Nsec(_) => return false,
        _ => false,
    };

    if matches_ours {
        return false;
    }

    match host.info.state {
        EntryState::Probing => true,
        EntryState::Registered => record.header.class.top_bit(),
        EntryState::Conflict | EntryState::Removing => false,
    }
}

fn service_record_conflicts(service: &ServiceEntry, record: &Resource) -> bool {
    let matches_ours = match &record.body {
        ResourceBody::Srv(srv) => {
            service.srv_record.can_answer()
                && srv.priority == service.priority
                && srv.weight == service.weight
                && srv.port == service.port
                && srv
                    .target
                    .matches(&format!("{}.local.", service.host_name))
        }
        ResourceBody::Txt(txt) => service.txt_record.can_answer() && txt.data == service.txt_data,
        ResourceBody::Key(key) => {
            service.info.key_record.can_answer() && service.info.key_data == key.data
        }
        ResourceBody::Ptr(_) | ResourceBody::Nsec(_) => return false,
        _ => false,
    };

    if matches_ours {
        return false;
    }

    match service.info.state {
        EntryState::Probing => true,
        EntryState::Registered => record.header.class.top_bit(),
        EntryState::Conflict | EntryState::Removing => false,
    }
}
