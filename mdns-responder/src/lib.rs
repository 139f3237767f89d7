//! # mdns-responder
//!
//! A sans-I/O Multicast DNS responder (RFC 6762) for Rust.
//!
//! This crate implements the *responder* side of mDNS: it registers host
//! names, services, and KEY records under the `.local.` domain, defends
//! those names against conflicting claims by probing, answers queries from
//! the multicast group, and withdraws names gracefully with "goodbye"
//! announcements. Queriers (cache, one-shot and continuous queries,
//! DNS-SD browsing) are out of scope.
//!
//! ## Sans-I/O design
//!
//! The [`Responder`] implements [`shared::Protocol`] and performs no I/O,
//! holds no threads, and owns no timers. The caller runs the event loop:
//!
//! 1. Send packets returned by `poll_write()` via UDP (multicast packets
//!    carry [`MDNS_DEST_ADDR`]; unicast responses carry the querier's
//!    address).
//! 2. Feed received datagrams from port 5353 into `handle_read()`.
//! 3. Call `handle_timeout()` whenever the deadline from `poll_timeout()`
//!    is reached.
//! 4. Drain registration outcomes and conflicts from `poll_event()`.
//!
//! Because everything is driven by explicit [`std::time::Instant`] values,
//! the full protocol behavior (probe spacing, announce schedule, response
//! delays, goodbye transmission) is deterministic and testable without a
//! network.
//!
//! ## Registering a host
//!
//! ```rust
//! use mdns_responder::{Host, Responder, ResponderConfig, ResponderEvent, RegisterOutcome};
//! use shared::Protocol;
//!
//! let mut responder = Responder::new(ResponderConfig::default());
//! responder.set_enabled(true).unwrap();
//!
//! responder
//!     .register_host(
//!         Host {
//!             host_name: "myhost".to_string(),
//!             addresses: vec!["fd00::1234".parse().unwrap()],
//!             ttl: 0, // use the default TTL
//!         },
//!         42,
//!     )
//!     .unwrap();
//!
//! // Drive the probe/announce timeline: each poll_timeout() deadline
//! // produces probe queries, then announcements.
//! while let Some(deadline) = responder.poll_timeout() {
//!     responder.handle_timeout(deadline).unwrap();
//!     while let Some(packet) = responder.poll_write() {
//!         // socket.send_to(&packet.message, packet.transport.peer_addr)
//!     }
//!     if let Some(event) = responder.poll_event() {
//!         assert_eq!(
//!             event,
//!             ResponderEvent::Registered { request_id: 42, outcome: RegisterOutcome::Success }
//!         );
//!         break;
//!     }
//! }
//! ```
//!
//! ## Registering a service
//!
//! ```rust
//! use mdns_responder::{Responder, ResponderConfig, Service};
//!
//! let mut responder = Responder::new(ResponderConfig::default());
//! responder.set_enabled(true).unwrap();
//!
//! responder
//!     .register_service(
//!         Service {
//!             service_instance: "my printer".to_string(),
//!             service_type: "_ipp._tcp".to_string(),
//!             host_name: "myhost".to_string(),
//!             sub_type_labels: vec!["_color".to_string()],
//!             txt_data: vec![8, b'p', b'a', b'p', b'e', b'r', b'=', b'a', b'4'],
//!             port: 631,
//!             priority: 0,
//!             weight: 0,
//!             ttl: 0,
//!         },
//!         7,
//!     )
//!     .unwrap();
//! ```
//!
//! Once registered, the service answers PTR queries for its type and for
//! `_services._dns-sd._udp.local.`, SRV/TXT queries for its instance name,
//! and sub-type PTR queries for `_color._sub._ipp._tcp.local.`.
//!
//! ## Protocol behavior
//!
//! - **Probing**: three queries spaced 250 ms apart (after a 0-20 ms
//!   jitter) with proposed records in the Authority section; simultaneous
//!   probes are tiebroken by lexicographic record comparison.
//! - **Announcing**: three unsolicited responses with the cache-flush bit
//!   set, the gaps doubling from one second.
//! - **Answering**: direct answers for unique names, 20-120 ms randomized
//!   delay for shared records, known-answer suppression, NSEC negative
//!   answers, and unicast replies to "QU" questions.
//! - **Goodbye**: a zero-TTL announcement retires each withdrawn record.
//! - Outgoing messages are capped (default 1200 bytes) and split across
//!   packets with the TC flag when needed; truncated queries from peers
//!   are buffered and answered once their known answers have arrived.

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub(crate) mod config;
pub(crate) mod message;
pub(crate) mod responder;
pub(crate) mod socket;

pub use config::ResponderConfig;
pub use responder::{
    Host, Key, MDNS_DEST_ADDR, MDNS_MULTICAST_IPV6, MDNS_PORT, RegisterOutcome, RequestId,
    Responder, ResponderEvent, Service,
};
pub use socket::MulticastSocket;

// Re-export the sans-I/O protocol trait for callers driving the responder.
pub use shared::Protocol;
