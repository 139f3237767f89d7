use super::name::*;
use super::resource::aaaa::AaaaResource;
use super::resource::nsec::NsecResource;
use super::resource::ptr::PtrResource;
use super::resource::srv::SrvResource;
use super::resource::txt::TxtResource;
use super::*;
use shared::error::Error;
use std::net::Ipv6Addr;

fn sample_message() -> Message {
    Message {
        header: Header {
            response: true,
            authoritative: true,
            ..Default::default()
        },
        questions: vec![Question {
            name: Name::new("_tst._udp.local").unwrap(),
            typ: DnsType::Ptr,
            class: DNSCLASS_INET,
        }],
        answers: vec![
            Resource {
                header: ResourceHeader {
                    name: Name::new("_tst._udp.local").unwrap(),
                    class: DNSCLASS_INET,
                    ttl: 120,
                    ..Default::default()
                },
                body: ResourceBody::Ptr(PtrResource {
                    ptr: Name::new("inst._tst._udp.local").unwrap(),
                }),
            },
            Resource {
                header: ResourceHeader {
                    name: Name::new("inst._tst._udp.local").unwrap(),
                    class: DnsClass(DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH),
                    ttl: 120,
                    ..Default::default()
                },
                body: ResourceBody::Srv(SrvResource {
                    priority: 1,
                    weight: 2,
                    port: 8080,
                    target: Name::new("myhost.local").unwrap(),
                }),
            },
        ],
        authorities: vec![],
        additionals: vec![Resource {
            header: ResourceHeader {
                name: Name::new("myhost.local").unwrap(),
                class: DnsClass(DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH),
                ttl: 120,
                ..Default::default()
            },
            body: ResourceBody::Aaaa(AaaaResource::from_addr(Ipv6Addr::new(
                0x2001, 0xdb8, 0, 0, 0, 0, 0, 1,
            ))),
        }],
    }
}

#[test]
fn test_message_round_trip() {
    let mut msg = sample_message();
    let packed = msg.pack().unwrap();

    let mut decoded = Message::default();
    decoded.unpack(&packed).unwrap();

    assert!(decoded.header.response);
    assert!(decoded.header.authoritative);
    assert_eq!(decoded.questions, msg.questions);
    assert_eq!(decoded.answers.len(), 2);
    assert_eq!(decoded.answers[0].header.name.data, "_tst._udp.local.");
    assert_eq!(
        decoded.answers[0].body,
        ResourceBody::Ptr(PtrResource {
            ptr: Name::new("inst._tst._udp.local").unwrap(),
        })
    );
    assert!(decoded.answers[1].header.class.top_bit());
    assert_eq!(decoded.additionals.len(), 1);
    assert_eq!(
        decoded.additionals[0].body,
        ResourceBody::Aaaa(AaaaResource::from_addr(
            "2001:db8::1".parse::<Ipv6Addr>().unwrap()
        ))
    );
}

#[test]
fn test_repacking_is_no_longer_than_original() {
    // Re-encoding a decoded message with the same compression context must
    // not grow the byte sequence.
    let mut msg = sample_message();
    let packed = msg.pack().unwrap();

    let mut decoded = Message::default();
    decoded.unpack(&packed).unwrap();
    let repacked = decoded.pack().unwrap();

    assert!(repacked.len() <= packed.len());
}

#[test]
fn test_name_compression_shrinks_message() {
    let mut with_shared_suffix = Message {
        questions: vec![
            Question {
                name: Name::new("alpha.local").unwrap(),
                typ: DnsType::Aaaa,
                class: DNSCLASS_INET,
            },
            Question {
                name: Name::new("beta.alpha.local").unwrap(),
                typ: DnsType::Aaaa,
                class: DNSCLASS_INET,
            },
        ],
        ..Default::default()
    };
    let packed = with_shared_suffix.pack().unwrap();

    // "alpha.local." appears once in full and once as a 2-byte pointer.
    let uncompressed_len = HEADER_LEN
        + (1 + 5 + 1 + 5 + 1 + 4) // alpha.local. + type + class
        + (1 + 4 + 1 + 5 + 1 + 5 + 1 + 4); // beta.alpha.local. + type + class
    assert!(packed.len() < uncompressed_len);
}

#[test]
fn test_name_rejects_forward_pointer() {
    // A name whose pointer targets data after itself must be rejected.
    let mut msg = vec![0u8; HEADER_LEN];
    msg[5] = 1; // one question
    msg.extend_from_slice(&[0xC0, 14]); // pointer to itself
    msg.extend_from_slice(&[0, 28, 0, 1]);

    let mut decoded = Message::default();
    assert!(decoded.unpack(&msg).is_err());
}

#[test]
fn test_name_rejects_pointer_cycle() {
    let mut msg = vec![0u8; HEADER_LEN];
    msg[5] = 1;
    // Two pointers referring to each other.
    msg.extend_from_slice(&[1, b'a', 0xC0, 16]);
    msg.extend_from_slice(&[1, b'b', 0xC0, 12]);
    msg.extend_from_slice(&[0, 28, 0, 1]);

    let mut decoded = Message::default();
    assert!(decoded.unpack(&msg).is_err());
}

#[test]
fn test_truncated_input_fails_with_parse_error() {
    let mut msg = sample_message();
    let packed = msg.pack().unwrap();

    for len in [0, 3, HEADER_LEN, packed.len() - 1] {
        let mut decoded = Message::default();
        let result = decoded.unpack(&packed[..len]);
        assert!(result.is_err(), "length {len} should fail to parse");
    }
}

#[test]
fn test_name_too_long_segment() {
    let long_label = "a".repeat(64);
    let name = Name::new(&format!("{long_label}.local")).unwrap();
    assert_eq!(
        name.pack(vec![], &mut None, 0),
        Err(Error::ErrSegTooLong)
    );
}

#[test]
fn test_name_case_insensitive_match() {
    let name = Name::new("MyHost.Local").unwrap();
    assert!(name.matches("myhost.local."));
    assert_eq!(name.to_canonical(), "myhost.local.");
}

#[test]
fn test_nsec_bitmap() {
    let nsec = NsecResource {
        next_domain: Name::new("myhost.local").unwrap(),
        types: vec![DnsType::Aaaa as u16, DnsType::Key as u16],
    };

    // AAAA = 28 and KEY = 25 both live in window 0; the bitmap spans
    // ceil((28 + 1) / 8) = 4 bytes.
    let bitmap = nsec.type_bitmap();
    assert_eq!(bitmap[0], 0); // window
    assert_eq!(bitmap[1], 4); // bitmap length
    assert_eq!(bitmap.len(), 2 + 4);
    assert_ne!(bitmap[2 + (28 >> 3)] & (0x80 >> (28 & 7)), 0);
    assert_ne!(bitmap[2 + (25 >> 3)] & (0x80 >> (25 & 7)), 0);

    // Round trip through the wire form.
    let packed = nsec.pack(vec![], &mut None, 0).unwrap();
    let mut decoded = NsecResource::default();
    decoded.unpack(&packed, 0, packed.len()).unwrap();
    assert_eq!(decoded.next_domain.data, "myhost.local.");
    assert_eq!(decoded.types, vec![25, 28]);
}

#[test]
fn test_txt_round_trip_preserves_encoded_data() {
    let txt = TxtResource {
        data: vec![5, b'k', b'e', b'y', b'=', b'v', 0],
    };
    let packed = txt.pack(vec![], &mut None, 0).unwrap();
    let mut decoded = TxtResource::default();
    decoded.unpack(&packed, 0, packed.len()).unwrap();
    assert_eq!(decoded, txt);
}

#[test]
fn test_query_with_qu_bit() {
    let mut msg = Message {
        questions: vec![Question {
            name: Name::new("myhost.local").unwrap(),
            typ: DnsType::Any,
            class: DnsClass(DNSCLASS_INET.0 | CLASS_UNICAST_RESPONSE_OR_CACHE_FLUSH),
        }],
        ..Default::default()
    };
    let packed = msg.pack().unwrap();

    let mut decoded = Message::default();
    decoded.unpack(&packed).unwrap();
    assert!(!decoded.header.response);
    let q = &decoded.questions[0];
    assert!(q.class.top_bit());
    assert!(q.class.is_internet_or_any());
    assert_eq!(q.class.base(), DNSCLASS_INET.0);
}
