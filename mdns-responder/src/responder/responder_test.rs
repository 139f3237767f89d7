use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use shared::error::Error;
use shared::{Protocol, TaggedBytesMut, TransportContext, TransportProtocol};

use super::*;
use crate::message::header::Header;
use crate::message::name::Name;
use crate::message::question::Question;
use crate::message::resource::aaaa::AaaaResource;
use crate::message::resource::ptr::PtrResource;
use crate::message::resource::{Resource, ResourceBody, ResourceHeader};
use crate::message::{
    CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH, DNSCLASS_INET, DnsClass, DnsType, Message,
};

fn sender_addr() -> SocketAddr {
    "[fe80::1234]:5353".parse().unwrap()
}

fn multicast_local_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V6(MDNS_MULTICAST_IPV6), MDNS_PORT)
}

fn tagged(bytes: Vec<u8>, now: Instant) -> TaggedBytesMut {
    TaggedBytesMut {
        now,
        transport: TransportContext {
            local_addr: multicast_local_addr(),
            peer_addr: sender_addr(),
            transport_protocol: TransportProtocol::UDP,
        },
        message: BytesMut::from(&bytes[..]),
    }
}

fn new_responder() -> Responder {
    let mut responder = Responder::new(ResponderConfig::default());
    responder.set_enabled(true).unwrap();
    responder
}

fn decode(packet: &TaggedBytesMut) -> Message {
    let mut msg = Message::default();
    msg.unpack(&packet.message).expect("emitted packet must parse");
    msg
}

fn drain_packets(responder: &mut Responder) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(packet) = responder.poll_write() {
        packets.push(packet);
    }
    packets
}

// Runs the next pending deadline and returns it.
fn run_next_timeout(responder: &mut Responder) -> Instant {
    let deadline = responder.poll_timeout().expect("a deadline must be pending");
    responder.handle_timeout(deadline).unwrap();
    deadline
}

// Drives every deadline up to `until`, collecting all emitted packets.
fn run_until(responder: &mut Responder, until: Instant) -> Vec<TaggedBytesMut> {
    let mut packets = Vec::new();
    while let Some(deadline) = responder.poll_timeout() {
        if deadline > until {
            break;
        }
        responder.handle_timeout(deadline).unwrap();
        packets.append(&mut drain_packets(responder));
    }
    packets.append(&mut drain_packets(responder));
    packets
}

// Drives the responder far enough past `start` that probing, announcing,
// and tx-history expiry are all finished, leaving it fully quiet.
fn settle(responder: &mut Responder, start: Instant) -> Instant {
    let settled = start + Duration::from_secs(20);
    run_until(responder, settled);
    while responder.poll_event().is_some() {}
    settled
}

fn test_host(name: &str, addrs: &[&str]) -> Host {
    Host {
        host_name: name.to_string(),
        addresses: addrs.iter().map(|a| a.parse().unwrap()).collect(),
        ttl: 0,
    }
}

fn test_service() -> Service {
    Service {
        service_instance: "inst".to_string(),
        service_type: "_foo._udp".to_string(),
        host_name: "h1".to_string(),
        sub_type_labels: vec![],
        txt_data: vec![],
        port: 80,
        priority: 0,
        weight: 0,
        ttl: 0,
    }
}

fn aaaa_answer(name: &str, addr: &str, ttl: u32, cache_flush: bool) -> Resource {
    let class = if cache_flush {
        DnsClass(DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH)
    } else {
        DNSCLASS_INET
    };
    Resource {
        header: ResourceHeader {
            name: Name::new(name).unwrap(),
            class,
            ttl,
            ..Default::default()
        },
        body: ResourceBody::Aaaa(AaaaResource::from_addr(addr.parse::<Ipv6Addr>().unwrap())),
    }
}

fn ptr_answer(name: &str, target: &str, ttl: u32) -> Resource {
    Resource {
        header: ResourceHeader {
            name: Name::new(name).unwrap(),
            class: DNSCLASS_INET,
            ttl,
            ..Default::default()
        },
        body: ResourceBody::Ptr(PtrResource {
            ptr: Name::new(target).unwrap(),
        }),
    }
}

fn query(questions: Vec<Question>, known_answers: Vec<Resource>, truncated: bool) -> Vec<u8> {
    let mut msg = Message {
        header: Header {
            truncated,
            ..Default::default()
        },
        questions,
        answers: known_answers,
        ..Default::default()
    };
    msg.pack().unwrap()
}

fn response(answers: Vec<Resource>) -> Vec<u8> {
    let mut msg = Message {
        header: Header {
            response: true,
            authoritative: true,
            ..Default::default()
        },
        answers,
        ..Default::default()
    };
    msg.pack().unwrap()
}

fn question(name: &str, typ: DnsType, unicast_response: bool) -> Question {
    let class = if unicast_response {
        DnsClass(DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH)
    } else {
        DNSCLASS_INET
    };
    Question {
        name: Name::new(name).unwrap(),
        typ,
        class,
    }
}

fn find_records<'a>(msg: &'a Message, typ: DnsType) -> Vec<&'a Resource> {
    msg.answers
        .iter()
        .chain(msg.additionals.iter())
        .filter(|r| r.header.typ == typ)
        .collect()
}

// Registers a host and a service pointing at it, then settles everything.
fn register_service_and_host(responder: &mut Responder) -> Instant {
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    responder.register_service(test_service(), 2).unwrap();
    settle(responder, start)
}

//--------------------------------------------------------------------
// State and configuration

#[test]
fn test_starts_disabled() {
    let mut responder = Responder::new(ResponderConfig::default());
    assert!(!responder.is_enabled());

    let result = responder.register_host(test_host("h1", &["2001:db8::1"]), 1);
    assert_eq!(result, Err(Error::ErrInvalidState));

    responder.set_enabled(true).unwrap();
    assert!(responder.is_enabled());
    assert_eq!(responder.set_enabled(true), Err(Error::ErrAlready));
}

#[test]
fn test_disable_drops_everything_silently() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    settle(&mut responder, start);

    responder.set_enabled(false).unwrap();

    // No goodbye traffic, no pending deadlines or packets.
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_timeout().is_none());
    assert_eq!(responder.host_entries.len(), 0);
}

#[test]
fn test_close_rejects_operations() {
    let mut responder = new_responder();
    responder.close().unwrap();

    assert_eq!(
        responder.register_host(test_host("h1", &["2001:db8::1"]), 1),
        Err(Error::ErrConnectionClosed)
    );
    assert_eq!(
        responder.handle_timeout(Instant::now()),
        Err(Error::ErrConnectionClosed)
    );
    let result = responder.handle_read(tagged(query(vec![], vec![], false), Instant::now()));
    assert_eq!(result, Err(Error::ErrConnectionClosed));
}

#[test]
fn test_register_empty_name_is_invalid() {
    let mut responder = new_responder();
    assert_eq!(
        responder.register_host(test_host("", &["2001:db8::1"]), 1),
        Err(Error::ErrInvalidArgs)
    );
}

//--------------------------------------------------------------------
// Scenario: basic claim (probe then announce)

#[test]
fn test_host_probe_and_announce_timeline() {
    let mut responder = new_responder();
    let before = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    // Nothing goes out synchronously, and the outcome is not reported yet.
    assert!(responder.poll_write().is_none());
    assert!(responder.poll_event().is_none());

    // First probe after the 0-20 ms startup jitter.
    let t1 = run_next_timeout(&mut responder);
    assert!(t1 >= before);
    assert!(t1 <= before + Duration::from_millis(50));

    let t2 = run_next_timeout(&mut responder);
    let t3 = run_next_timeout(&mut responder);
    assert_eq!(t2 - t1, Duration::from_millis(250));
    assert_eq!(t3 - t2, Duration::from_millis(250));

    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 3);
    for packet in &packets {
        assert_eq!(packet.transport.peer_addr, MDNS_DEST_ADDR);
        let msg = decode(packet);
        assert!(!msg.header.response, "probes are queries");
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].name.data, "h1.local.");
        assert_eq!(msg.questions[0].typ, DnsType::Any);
        // Proposed records go to the Authority section, not Answer.
        assert!(msg.answers.is_empty());
        assert_eq!(msg.authorities.len(), 1);
        assert_eq!(msg.authorities[0].header.typ, DnsType::Aaaa);
        assert!(
            !msg.authorities[0].header.class.top_bit(),
            "no cache-flush on probe proposals"
        );
    }

    // Still no outcome while probing.
    assert!(responder.poll_event().is_none());

    // Fourth fire claims the name and sends the first announcement.
    let t4 = run_next_timeout(&mut responder);
    assert_eq!(t4 - t3, Duration::from_millis(250));

    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 1,
            outcome: RegisterOutcome::Success,
        })
    );
    assert!(responder.poll_event().is_none());

    let announce1 = drain_packets(&mut responder);
    assert_eq!(announce1.len(), 1);
    let msg = decode(&announce1[0]);
    assert!(msg.header.response);
    assert!(msg.header.authoritative);
    assert_eq!(msg.questions.len(), 0);
    let aaaa = find_records(&msg, DnsType::Aaaa);
    assert_eq!(aaaa.len(), 1);
    assert!(aaaa[0].header.class.top_bit(), "cache-flush set on announcements");
    assert_eq!(aaaa[0].header.ttl, 120);

    // Two more announcements with doubling gaps.
    let t5 = run_next_timeout(&mut responder);
    assert_eq!(t5 - t4, Duration::from_secs(1));
    assert_eq!(drain_packets(&mut responder).len(), 1);

    let t6 = run_next_timeout(&mut responder);
    assert_eq!(t6 - t5, Duration::from_secs(2));
    assert_eq!(drain_packets(&mut responder).len(), 1);

    // No further traffic for the next 10 seconds (only tx-history expiry
    // deadlines remain in that window).
    let quiet_until = t6 + Duration::from_secs(10);
    assert!(run_until(&mut responder, quiet_until).is_empty());
}

#[test]
fn test_probe_uses_qu_question_when_allowed() {
    let mut responder = new_responder();
    responder.set_question_unicast_allowed(true);
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    run_next_timeout(&mut responder);
    run_next_timeout(&mut responder);

    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 2);

    let first = decode(&packets[0]);
    assert!(
        first.questions[0].class.top_bit(),
        "first probe requests unicast response"
    );
    let second = decode(&packets[1]);
    assert!(
        !second.questions[0].class.top_bit(),
        "later probes are QM questions"
    );
}

//--------------------------------------------------------------------
// Scenario: name conflict

#[test]
fn test_conflict_during_probing_reports_duplicated() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    let t1 = run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    // Another responder answers with a different address for our name.
    let conflict = response(vec![aaaa_answer("h1.local.", "2001:db8::2", 120, true)]);
    responder
        .handle_read(tagged(conflict, t1 + Duration::from_millis(10)))
        .unwrap();

    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 1,
            outcome: RegisterOutcome::Duplicated,
        })
    );
    assert!(responder.poll_event().is_none());
    assert_eq!(responder.host_entries.len(), 0, "conflicted entry is freed");

    // No further probes or announcements go out under the lost name.
    let packets = run_until(&mut responder, t1 + Duration::from_secs(11));
    assert!(packets.is_empty());
    assert!(responder.poll_event().is_none());
}

#[test]
fn test_identical_records_do_not_conflict_while_probing() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    let t1 = run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    // The same data echoed back is not a conflict.
    let echo = response(vec![aaaa_answer("h1.local.", "2001:db8::1", 120, true)]);
    responder
        .handle_read(tagged(echo, t1 + Duration::from_millis(10)))
        .unwrap();

    assert!(responder.poll_event().is_none());
    assert_eq!(responder.host_entries.len(), 1);
}

#[test]
fn test_conflict_after_registered_emits_conflict_event() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    // A cache-flush record with different data claims our name.
    let conflict = response(vec![aaaa_answer("h1.local.", "2001:db8::2", 120, true)]);
    responder
        .handle_read(tagged(conflict, settled + Duration::from_millis(100)))
        .unwrap();

    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Conflict {
            name: "h1".to_string(),
            service_type: None,
        })
    );
    assert_eq!(responder.host_entries.len(), 0);
}

#[test]
fn test_registered_ignores_non_cache_flush_claims() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    // Without the cache-flush bit the record does not assert unique
    // ownership, so a registered entry stands its ground.
    let claim = response(vec![aaaa_answer("h1.local.", "2001:db8::2", 120, false)]);
    responder
        .handle_read(tagged(claim, settled + Duration::from_millis(100)))
        .unwrap();

    assert!(responder.poll_event().is_none());
    assert_eq!(responder.host_entries.len(), 1);
}

//--------------------------------------------------------------------
// Probe tiebreak

#[test]
fn test_simultaneous_probe_lexicographically_greater_peer_wins() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    let t1 = run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    // A simultaneous probe whose proposed AAAA sorts above ours.
    let mut peer_probe = Message {
        questions: vec![question("h1.local.", DnsType::Any, false)],
        authorities: vec![aaaa_answer("h1.local.", "2001:db8::ff", 120, false)],
        ..Default::default()
    };
    let feed_time = t1 + Duration::from_millis(5);
    responder
        .handle_read(tagged(peer_probe.pack().unwrap(), feed_time))
        .unwrap();

    assert!(responder.poll_event().is_none(), "a tiebreak loss is not a conflict");
    assert_eq!(responder.host_entries.len(), 1);

    // The already-armed probe deadline fires without sending anything.
    let stale = run_next_timeout(&mut responder);
    assert_eq!(stale - t1, Duration::from_millis(250));
    assert!(responder.poll_write().is_none());

    // Probing restarts after the one second back-off.
    let next = responder.poll_timeout().unwrap();
    assert_eq!(next - feed_time, Duration::from_secs(1));
}

#[test]
fn test_simultaneous_probe_lexicographically_smaller_peer_loses() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    let t1 = run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    let mut peer_probe = Message {
        questions: vec![question("h1.local.", DnsType::Any, false)],
        authorities: vec![aaaa_answer("h1.local.", "2001:db8::", 120, false)],
        ..Default::default()
    };
    responder
        .handle_read(tagged(
            peer_probe.pack().unwrap(),
            t1 + Duration::from_millis(5),
        ))
        .unwrap();

    // We won the tiebreak: the probe schedule is unchanged.
    let next = responder.poll_timeout().unwrap();
    assert_eq!(next - t1, Duration::from_millis(250));
}

//--------------------------------------------------------------------
// Answering queries

#[test]
fn test_answers_host_question_immediately() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    let query_time = settled + Duration::from_secs(1);
    let q = query(vec![question("h1.local.", DnsType::Aaaa, false)], vec![], false);
    responder.handle_read(tagged(q, query_time)).unwrap();

    // A query fully answerable from unique records is answered without
    // the random delay.
    let deadline = responder.poll_timeout().unwrap();
    assert_eq!(deadline, query_time);
    responder.handle_timeout(deadline).unwrap();

    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);
    assert!(msg.header.response);
    let aaaa = find_records(&msg, DnsType::Aaaa);
    assert_eq!(aaaa.len(), 1);
    assert!(aaaa[0].header.class.top_bit());
}

#[test]
fn test_rate_limits_repeated_answers() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    let first_query = settled + Duration::from_secs(1);
    let q = query(vec![question("h1.local.", DnsType::Aaaa, false)], vec![], false);
    responder.handle_read(tagged(q.clone(), first_query)).unwrap();
    responder.handle_timeout(first_query).unwrap();
    assert_eq!(drain_packets(&mut responder).len(), 1);

    // The same question again 200 ms later: within the one-second
    // multicast rate limit, no answer is scheduled.
    let second_query = first_query + Duration::from_millis(200);
    responder.handle_read(tagged(q, second_query)).unwrap();
    responder
        .handle_timeout(second_query + Duration::from_millis(200))
        .unwrap();
    assert!(responder.poll_write().is_none());
}

#[test]
fn test_qu_question_gets_unicast_response() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    let query_time = settled + Duration::from_secs(1);
    let q = query(vec![question("h1.local.", DnsType::Aaaa, true)], vec![], false);
    responder.handle_read(tagged(q, query_time)).unwrap();

    // The unicast response goes out in the same rx pass, addressed to the
    // querier rather than the multicast group.
    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].transport.peer_addr, sender_addr());
    let msg = decode(&packets[0]);
    assert_eq!(find_records(&msg, DnsType::Aaaa).len(), 1);
}

#[test]
fn test_nsec_answer_for_missing_type() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    // Ask for a type the host name does not hold.
    let query_time = settled + Duration::from_secs(1);
    let q = query(vec![question("h1.local.", DnsType::Txt, false)], vec![], false);
    responder.handle_read(tagged(q, query_time)).unwrap();

    responder.handle_timeout(query_time).unwrap();
    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);

    let msg = decode(&packets[0]);
    let nsec = find_records(&msg, DnsType::Nsec);
    assert_eq!(nsec.len(), 1);
    assert_eq!(nsec[0].header.name.data, "h1.local.");
    assert_eq!(nsec[0].header.ttl, 4500);
    assert!(nsec[0].header.class.top_bit());
    if let ResourceBody::Nsec(body) = &nsec[0].body {
        assert_eq!(body.next_domain.data, "h1.local.");
        assert_eq!(body.types, vec![DnsType::Aaaa as u16]);
    } else {
        panic!("expected NSEC body");
    }
}

#[test]
fn test_no_answer_while_probing() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    let t1 = run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    // A plain (non-probe) query while we are still probing: silence.
    let q = query(vec![question("h1.local.", DnsType::Aaaa, false)], vec![], false);
    responder
        .handle_read(tagged(q, t1 + Duration::from_millis(10)))
        .unwrap();
    assert!(responder.poll_write().is_none());

    // The next deadline is still the second probe.
    assert_eq!(
        responder.poll_timeout().unwrap() - t1,
        Duration::from_millis(250)
    );
}

//--------------------------------------------------------------------
// Scenario: known-answer suppression

#[test]
fn test_known_answer_with_high_ttl_suppresses_response() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question("_foo._udp.local.", DnsType::Ptr, false)],
        vec![ptr_answer("_foo._udp.local.", "inst._foo._udp.local.", 70)],
        false,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    // TTL 70 is above half of our 120: the answer is suppressed.
    responder
        .handle_timeout(query_time + Duration::from_millis(200))
        .unwrap();
    assert!(responder.poll_write().is_none());
}

#[test]
fn test_known_answer_with_low_ttl_does_not_suppress() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question("_foo._udp.local.", DnsType::Ptr, false)],
        vec![ptr_answer("_foo._udp.local.", "inst._foo._udp.local.", 40)],
        false,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    // TTL 40 is below half of 120; the answer goes out after the shared
    // record response delay (20-120 ms).
    let deadline = responder.poll_timeout().unwrap();
    assert!(deadline >= query_time + Duration::from_millis(20));
    assert!(deadline <= query_time + Duration::from_millis(120));
    responder.handle_timeout(deadline).unwrap();

    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);
    let ptrs = find_records(&msg, DnsType::Ptr);
    assert_eq!(ptrs.len(), 1);
    assert!(
        !ptrs[0].header.class.top_bit(),
        "PTR records are shared, never cache-flush"
    );
    // RFC 6763 additionals: SRV, TXT, and addresses ride along with a PTR
    // answer.
    assert_eq!(find_records(&msg, DnsType::Srv).len(), 1);
    assert_eq!(find_records(&msg, DnsType::Txt).len(), 1);
    assert_eq!(find_records(&msg, DnsType::Aaaa).len(), 1);
}

//--------------------------------------------------------------------
// Scenario: service update

#[test]
fn test_service_update_announces_diffs() {
    let mut responder = new_responder();
    let start = Instant::now();
    let mut service = test_service();
    service.sub_type_labels = vec!["sA".to_string()];
    responder.register_service(service, 1).unwrap();
    settle(&mut responder, start);

    // Update: new port, sub-type sA replaced by sB.
    let mut updated = test_service();
    updated.port = 81;
    updated.sub_type_labels = vec!["sB".to_string()];
    responder.register_service(updated, 2).unwrap();

    // The entry is already registered, so the outcome is immediate.
    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 2,
            outcome: RegisterOutcome::Success,
        })
    );

    run_next_timeout(&mut responder);
    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);

    // SRV re-announced with the new port.
    let srv = find_records(&msg, DnsType::Srv);
    assert_eq!(srv.len(), 1);
    if let ResourceBody::Srv(body) = &srv[0].body {
        assert_eq!(body.port, 81);
    } else {
        panic!("expected SRV body");
    }

    // Goodbye for the removed sub-type, announcement for the added one.
    let ptrs = find_records(&msg, DnsType::Ptr);
    let sa = ptrs
        .iter()
        .find(|r| r.header.name.data == "sA._sub._foo._udp.local.")
        .expect("goodbye PTR for removed sub-type");
    assert_eq!(sa.header.ttl, 0);
    let sb = ptrs
        .iter()
        .find(|r| r.header.name.data == "sB._sub._foo._udp.local.")
        .expect("announcement PTR for new sub-type");
    assert_eq!(sb.header.ttl, 120);

    // The unchanged base PTR is not re-announced.
    assert!(
        !ptrs
            .iter()
            .any(|r| r.header.name.data == "_foo._udp.local."),
        "unchanged records are not re-announced"
    );
}

//--------------------------------------------------------------------
// Scenario: oversized announcements split across packets

#[test]
fn test_announcement_splits_with_truncation_flag() {
    let mut responder = new_responder();
    responder.set_max_message_size(200);

    let addrs: Vec<String> = (1..=10).map(|i| format!("2001:db8::{i}")).collect();
    let addr_refs: Vec<&str> = addrs.iter().map(|s| s.as_str()).collect();
    responder
        .register_host(test_host("h1", &addr_refs), 1)
        .unwrap();

    for _ in 0..3 {
        run_next_timeout(&mut responder);
    }
    drain_packets(&mut responder);

    // The announcement must split into whole-record subsets.
    run_next_timeout(&mut responder);
    let packets = drain_packets(&mut responder);
    assert!(packets.len() >= 2, "expected a split announcement");

    let mut total_aaaa = 0;
    for (i, packet) in packets.iter().enumerate() {
        let msg = decode(packet);
        let aaaa = find_records(&msg, DnsType::Aaaa);
        assert!(!aaaa.is_empty(), "every packet carries whole records");
        total_aaaa += aaaa.len();

        let is_last = i == packets.len() - 1;
        assert_eq!(
            msg.header.truncated, !is_last,
            "TC set on all but the final packet"
        );
    }
    assert_eq!(total_aaaa, 10, "all address records are announced");
}

//--------------------------------------------------------------------
// Scenario: multi-packet queries

#[test]
fn test_multi_packet_known_answers_suppress() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    // A truncated query: its known answers follow in another packet.
    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question("_foo._udp.local.", DnsType::Ptr, false)],
        vec![],
        true,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    // Settlement is deferred 400-500 ms waiting for more packets.
    let settle_deadline = responder.poll_timeout().unwrap();
    assert!(settle_deadline >= query_time + Duration::from_millis(400));
    assert!(settle_deadline <= query_time + Duration::from_millis(500));
    assert!(responder.poll_write().is_none());

    // The continuation carries the known answer (no questions, TC clear).
    let followup_time = query_time + Duration::from_millis(200);
    let followup = query(
        vec![],
        vec![ptr_answer("_foo._udp.local.", "inst._foo._udp.local.", 120)],
        false,
    );
    responder.handle_read(tagged(followup, followup_time)).unwrap();

    // A non-truncated continuation settles the bundle immediately, and
    // the pooled known answer suppresses our response.
    let deadline = responder.poll_timeout().unwrap();
    assert!(deadline <= followup_time);
    responder
        .handle_timeout(followup_time + Duration::from_millis(300))
        .unwrap();
    assert!(responder.poll_write().is_none());
}

#[test]
fn test_multi_packet_low_ttl_known_answer_still_answered() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question("_foo._udp.local.", DnsType::Ptr, false)],
        vec![],
        true,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    let followup_time = query_time + Duration::from_millis(200);
    let followup = query(
        vec![],
        vec![ptr_answer("_foo._udp.local.", "inst._foo._udp.local.", 10)],
        false,
    );
    responder.handle_read(tagged(followup, followup_time)).unwrap();

    // Settled and answered: TTL 10 does not suppress.
    let packets = run_until(&mut responder, followup_time + Duration::from_millis(300));
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);
    assert_eq!(find_records(&msg, DnsType::Ptr).len(), 1);
}

//--------------------------------------------------------------------
// Service type enumeration

#[test]
fn test_answers_all_services_meta_query() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question(
            "_services._dns-sd._udp.local.",
            DnsType::Ptr,
            false,
        )],
        vec![],
        false,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    let packets = run_until(&mut responder, query_time + Duration::from_millis(200));
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);
    let ptrs = find_records(&msg, DnsType::Ptr);
    assert_eq!(ptrs.len(), 1);
    assert_eq!(ptrs[0].header.name.data, "_services._dns-sd._udp.local.");
    assert_eq!(ptrs[0].header.ttl, 4500);
    if let ResourceBody::Ptr(body) = &ptrs[0].body {
        assert_eq!(body.ptr.data, "_foo._udp.local.");
    } else {
        panic!("expected PTR body");
    }
}

#[test]
fn test_all_services_known_answer_suppression() {
    let mut responder = new_responder();
    let settled = register_service_and_host(&mut responder);

    // A known answer at more than half our 4500 second TTL suppresses the
    // enumeration PTR.
    let query_time = settled + Duration::from_secs(1);
    let q = query(
        vec![question(
            "_services._dns-sd._udp.local.",
            DnsType::Ptr,
            false,
        )],
        vec![ptr_answer(
            "_services._dns-sd._udp.local.",
            "_foo._udp.local.",
            3000,
        )],
        false,
    );
    responder.handle_read(tagged(q, query_time)).unwrap();

    let packets = run_until(&mut responder, query_time + Duration::from_millis(200));
    assert!(packets.is_empty());
}

#[test]
fn test_service_type_refcount_drops_aggregator() {
    let mut responder = new_responder();
    register_service_and_host(&mut responder);
    assert_eq!(responder.service_types.len(), 1);

    responder.unregister_service("inst", "_foo._udp").unwrap();
    assert_eq!(
        responder.service_types.len(),
        0,
        "aggregator freed when its last service goes away"
    );
}

//--------------------------------------------------------------------
// Goodbye

#[test]
fn test_unregister_sends_single_goodbye() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    let settled = settle(&mut responder, start);

    responder.unregister_host("h1").unwrap();

    run_next_timeout(&mut responder);
    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 1);
    let msg = decode(&packets[0]);
    let aaaa = find_records(&msg, DnsType::Aaaa);
    assert_eq!(aaaa.len(), 1);
    assert_eq!(aaaa[0].header.ttl, 0, "goodbye carries zero TTL");

    assert_eq!(responder.host_entries.len(), 0, "entry freed after goodbye");

    // Exactly one goodbye: nothing further goes out.
    let packets = run_until(&mut responder, settled + Duration::from_secs(15));
    assert!(packets.is_empty());
}

#[test]
fn test_unregister_while_probing_is_silent() {
    let mut responder = new_responder();
    let start = Instant::now();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();
    run_next_timeout(&mut responder);
    drain_packets(&mut responder);

    responder.unregister_host("h1").unwrap();
    assert_eq!(responder.host_entries.len(), 0);

    // No goodbye for a name that was never claimed.
    let packets = run_until(&mut responder, start + Duration::from_secs(11));
    assert!(packets.is_empty());
}

//--------------------------------------------------------------------
// KEY records

#[test]
fn test_key_record_probes_and_answers() {
    let mut responder = new_responder();
    responder
        .register_key(
            Key {
                name: "h1".to_string(),
                service_type: None,
                key_data: vec![1, 2, 3, 4],
                ttl: 0,
            },
            9,
        )
        .unwrap();

    // A key-only entry probes like any other.
    for _ in 0..3 {
        run_next_timeout(&mut responder);
    }
    let packets = drain_packets(&mut responder);
    assert_eq!(packets.len(), 3);
    let msg = decode(&packets[0]);
    assert_eq!(msg.authorities.len(), 1);
    assert_eq!(msg.authorities[0].header.typ, DnsType::Key);

    run_next_timeout(&mut responder);
    assert_eq!(
        responder.poll_event(),
        Some(ResponderEvent::Registered {
            request_id: 9,
            outcome: RegisterOutcome::Success,
        })
    );
    let announce = drain_packets(&mut responder);
    assert_eq!(announce.len(), 1);
    let msg = decode(&announce[0]);
    let keys = find_records(&msg, DnsType::Key);
    assert_eq!(keys.len(), 1);
    if let ResourceBody::Key(body) = &keys[0].body {
        assert_eq!(body.data, vec![1, 2, 3, 4]);
    } else {
        panic!("expected KEY body");
    }

    // The NSEC bitmap of a key-only entry lists exactly KEY.
    let nsec = find_records(&msg, DnsType::Nsec);
    assert_eq!(nsec.len(), 1);
    if let ResourceBody::Nsec(body) = &nsec[0].body {
        assert_eq!(body.types, vec![DnsType::Key as u16]);
    } else {
        panic!("expected NSEC body");
    }
}

//--------------------------------------------------------------------
// Self-origination filter

#[test]
fn test_own_looped_back_message_is_ignored() {
    let mut responder = new_responder();
    responder
        .register_host(test_host("h1", &["2001:db8::1"]), 1)
        .unwrap();

    // Run through probing to the first announcement.
    for _ in 0..3 {
        run_next_timeout(&mut responder);
    }
    drain_packets(&mut responder);
    let t4 = run_next_timeout(&mut responder);
    while responder.poll_event().is_some() {}
    let announce = drain_packets(&mut responder);
    assert_eq!(announce.len(), 1);

    // Our own announcement, delivered back via multicast loopback: it
    // carries our name with cache-flush set, yet must not self-conflict.
    let looped = announce[0].message.to_vec();
    responder
        .handle_read(tagged(looped, t4 + Duration::from_millis(1)))
        .unwrap();

    assert!(responder.poll_event().is_none());
    assert_eq!(responder.host_entries.len(), 1);
}
