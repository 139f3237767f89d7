//! Integration tests for mdns-responder
//!
//! These drive the responder through its public sans-I/O surface without
//! any network I/O: packets from `poll_write()` are inspected at the wire
//! level or shuttled into a second responder.

use bytes::BytesMut;
use mdns_responder::{
    Host, MDNS_DEST_ADDR, RegisterOutcome, Responder, ResponderConfig, ResponderEvent, Service,
};
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn transport(local: SocketAddr, peer: SocketAddr) -> TransportContext {
    TransportContext {
        local_addr: local,
        peer_addr: peer,
        transport_protocol: TransportProtocol::UDP,
    }
}

fn new_responder() -> Responder {
    let mut responder = Responder::new(ResponderConfig::default());
    responder.set_enabled(true).unwrap();
    responder
}

fn drain(responder: &mut Responder) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(packet) = responder.poll_write() {
        packets.push(packet);
    }
    packets
}

// Drives every deadline up to `until`, collecting emitted packets.
fn run_until(responder: &mut Responder, until: Instant) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(deadline) = responder.poll_timeout() {
        if deadline > until {
            break;
        }
        responder.handle_timeout(deadline).unwrap();
        packets.append(&mut drain(responder));
    }
    packets.append(&mut drain(responder));
    packets
}

// Minimal wire-level header inspection.
fn header_flags(packet: &TaggedBytesMut) -> u16 {
    u16::from_be_bytes([packet.message[2], packet.message[3]])
}

fn header_count(packet: &TaggedBytesMut, index: usize) -> u16 {
    let off = 4 + index * 2;
    u16::from_be_bytes([packet.message[off], packet.message[off + 1]])
}

const FLAG_QR: u16 = 1 << 15;
const FLAG_AA: u16 = 1 << 10;

fn is_response(packet: &TaggedBytesMut) -> bool {
    header_flags(packet) & FLAG_QR != 0
}

fn host(name: &str, addr: &str) -> Host {
    Host {
        host_name: name.to_string(),
        addresses: vec![addr.parse().unwrap()],
        ttl: 0,
    }
}

// Delivers `packets` into `to` as if received from `from_addr` on the
// multicast group.
fn deliver(to: &mut Responder, from_addr: SocketAddr, packets: &[TaggedBytesMut], now: Instant) {
    for packet in packets {
        if packet.transport.peer_addr != MDNS_DEST_ADDR {
            continue;
        }
        let msg = TaggedBytesMut {
            now,
            transport: transport(MDNS_DEST_ADDR, from_addr),
            message: BytesMut::from(&packet.message[..]),
        };
        let _ = to.handle_read(msg);
    }
}

#[test]
fn test_host_claim_produces_probes_then_announcements() {
    let mut responder = new_responder();
    let start = Instant::now();

    responder
        .register_host(host("myhost", "2001:db8::1"), 1)
        .unwrap();

    // Nothing is sent synchronously and no outcome is visible yet.
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_event().is_none());

    let packets = run_until(&mut responder, start + Duration::from_secs(5));

    // Three probes, then three announcements, all to the multicast group.
    assert_eq!(packets.len(), 6);
    for packet in &packets {
        assert_eq!(packet.transport.peer_addr, MDNS_DEST_ADDR);
        assert_eq!(packet.transport.peer_addr.to_string(), "[ff02::fb]:5353");
    }

    for probe in &packets[..3] {
        assert!(!is_response(probe));
        assert_eq!(header_count(probe, 0), 1, "one question per probe");
        assert_eq!(header_count(probe, 1), 0, "no answers in a probe");
        assert_eq!(header_count(probe, 2), 1, "proposed record in authority");
    }

    for announce in &packets[3..] {
        assert!(is_response(announce));
        assert!(header_flags(announce) & FLAG_AA != 0, "responses are authoritative");
        assert!(header_count(announce, 1) >= 1, "announcements carry answers");
    }

    // The registration outcome arrived exactly once.
    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 1,
            outcome: RegisterOutcome::Success,
        })
    );
    assert!(responder.poll_event().is_none());

    // And the link stays quiet afterwards.
    let quiet = run_until(&mut responder, start + Duration::from_secs(15));
    assert!(quiet.is_empty());
}

#[test]
fn test_second_responder_loses_claimed_name() {
    let addr_a: SocketAddr = "[fe80::a]:5353".parse().unwrap();
    let addr_b: SocketAddr = "[fe80::b]:5353".parse().unwrap();

    // Responder A claims the name.
    let mut a = new_responder();
    let start = Instant::now();
    a.register_host(host("shared-name", "2001:db8::a"), 1).unwrap();
    run_until(&mut a, start + Duration::from_secs(5));
    assert!(matches!(
        a.poll_event(),
        Some(ResponderEvent::Registered {
            outcome: RegisterOutcome::Success,
            ..
        })
    ));

    // Responder B tries to claim the same name with a different address.
    let mut b = new_responder();
    let b_start = Instant::now();
    b.register_host(host("shared-name", "2001:db8::b"), 2).unwrap();

    // B's first probe reaches A, which defends the name.
    let b_probe_deadline = b.poll_timeout().unwrap();
    b.handle_timeout(b_probe_deadline).unwrap();
    let b_probes = drain(&mut b);
    assert_eq!(b_probes.len(), 1);
    deliver(&mut a, addr_b, &b_probes, b_probe_deadline);

    // A answers the probe immediately.
    let a_deadline = a.poll_timeout().unwrap();
    a.handle_timeout(a_deadline).unwrap();
    let a_answers = drain(&mut a);
    assert!(!a_answers.is_empty(), "A must defend its name");
    assert!(a_answers.iter().all(is_response));

    // A's defense reaches B, which reports the duplicate and goes silent.
    deliver(&mut b, addr_a, &a_answers, a_deadline);
    assert_eq!(
        b.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 2,
            outcome: RegisterOutcome::Duplicated,
        })
    );

    let b_traffic = run_until(&mut b, b_start + Duration::from_secs(12));
    assert!(b_traffic.is_empty(), "B must stop transmitting under the lost name");

    // A is unaffected.
    assert!(a.poll_event().is_none());
}

#[test]
fn test_service_and_host_registration_complete() {
    let mut responder = new_responder();
    let start = Instant::now();

    responder
        .register_host(host("srvhost", "2001:db8::5"), 10)
        .unwrap();
    responder
        .register_service(
            Service {
                service_instance: "unit".to_string(),
                service_type: "_tst._udp".to_string(),
                host_name: "srvhost".to_string(),
                sub_type_labels: vec![],
                txt_data: vec![],
                port: 12345,
                priority: 1,
                weight: 2,
                ttl: 0,
            },
            11,
        )
        .unwrap();

    let packets = run_until(&mut responder, start + Duration::from_secs(5));
    assert!(!packets.is_empty());

    let mut outcomes = Vec::new();
    while let Some(event) = responder.poll_event() {
        match event {
            ResponderEvent::Registered {
                request_id,
                outcome,
            } => outcomes.push((request_id, outcome)),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(outcomes.contains(&(10, RegisterOutcome::Success)));
    assert!(outcomes.contains(&(11, RegisterOutcome::Success)));
}

#[test]
fn test_unregister_sends_goodbye_then_silence() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(host("bye", "2001:db8::9"), 1)
        .unwrap();
    run_until(&mut responder, start + Duration::from_secs(5));
    while responder.poll_event().is_some() {}

    responder.unregister_host("bye").unwrap();

    let packets = run_until(&mut responder, start + Duration::from_secs(20));
    assert_eq!(packets.len(), 1, "exactly one goodbye transmission");
    assert!(is_response(&packets[0]));
    assert!(header_count(&packets[0], 1) >= 1);
}

#[test]
fn test_disabled_responder_rejects_registrations() {
    let mut responder = Responder::new(ResponderConfig::default());

    assert!(responder.register_host(host("h", "2001:db8::1"), 1).is_err());
    assert!(responder.poll_timeout().is_none());

    responder.set_enabled(true).unwrap();
    assert!(responder.register_host(host("h", "2001:db8::1"), 1).is_ok());

    // Disabling drops everything without goodbyes.
    responder.set_enabled(false).unwrap();
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_timeout().is_none());
}

#[test]
fn test_close_clears_all_state() {
    let mut responder = new_responder();
    responder
        .register_host(host("h", "2001:db8::1"), 1)
        .unwrap();
    assert!(responder.poll_timeout().is_some());

    responder.close().unwrap();

    assert!(responder.poll_timeout().is_none());
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_event().is_none());
    assert!(responder.handle_timeout(Instant::now()).is_err());
}

#[test]
fn test_max_message_size_splits_large_announcements() {
    let mut responder = new_responder();
    responder.set_max_message_size(200);
    let start = Instant::now();

    let addresses: Vec<std::net::Ipv6Addr> =
        (1..=10).map(|i| format!("2001:db8::{i}").parse().unwrap()).collect();
    responder
        .register_host(
            Host {
                host_name: "many".to_string(),
                addresses,
                ttl: 0,
            },
            1,
        )
        .unwrap();

    let packets = run_until(&mut responder, start + Duration::from_secs(5));

    // Announcement responses must be split, with TC on all but the last
    // packet of each burst.
    let responses: Vec<_> = packets.iter().filter(|p| is_response(p)).collect();
    assert!(responses.len() > 3, "each announcement requires several packets");

    const FLAG_TC: u16 = 1 << 9;
    assert!(
        responses.iter().any(|p| header_flags(p) & FLAG_TC != 0),
        "split announcements carry the TC flag"
    );
}
