pub(crate) mod aaaa;
pub(crate) mod key;
pub(crate) mod nsec;
pub(crate) mod ptr;
pub(crate) mod srv;
pub(crate) mod txt;

use std::collections::HashMap;
use std::fmt;

use aaaa::*;
use key::*;
use nsec::*;
use ptr::*;
use srv::*;
use txt::*;

use super::name::*;
use super::packer::*;
use super::*;
use shared::error::{Error, Result};

// A Resource is a DNS resource record.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Resource {
    pub(crate) header: ResourceHeader,
    pub(crate) body: ResourceBody,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dnsmessage.Resource{{Header: {}, Body: {:?}}}",
            self.header, self.body
        )
    }
}

impl Resource {
    // pack appends the wire format of the Resource to msg.
    pub(crate) fn pack(
        &mut self,
        msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        self.header.typ = self.body.real_type();
        let (mut msg, len_off) = self.header.pack(msg, compression, compression_off)?;
        let pre_len = msg.len();
        msg = self.body.pack(msg, compression, compression_off)?;
        self.header.fix_len(&mut msg, len_off, pre_len)?;
        Ok(msg)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], mut off: usize) -> Result<usize> {
        off = self.header.unpack(msg, off)?;
        let (body, off) = unpack_resource_body(self.header.typ, msg, off, self.header.length as usize)?;
        self.body = body;
        Ok(off)
    }

    pub(crate) fn skip(msg: &[u8], off: usize) -> Result<usize> {
        let mut new_off = Name::skip(msg, off)?;
        new_off = DnsType::skip(msg, new_off)?;
        new_off = DnsClass::skip(msg, new_off)?;
        new_off = skip_uint32(msg, new_off)?;
        let (length, mut new_off) = unpack_uint16(msg, new_off)?;
        new_off += length as usize;
        if new_off > msg.len() {
            return Err(Error::ErrResourceLen);
        }
        Ok(new_off)
    }
}

/// Header shared by every DNS resource record: name, type, class, TTL, and
/// the length of the record data that follows.
///
/// The class keeps the raw wire value: in mDNS, bit 15 of an answer's class
/// is the cache-flush flag marking a unique record set, read via
/// `DnsClass::top_bit()`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub(crate) struct ResourceHeader {
    pub(crate) name: Name,

    /// Set automatically during packing from the body.
    pub(crate) typ: DnsType,

    pub(crate) class: DnsClass,

    /// Time to live in seconds. Zero retires the record ("goodbye").
    pub(crate) ttl: u32,

    /// Length of the record data; set automatically during packing.
    pub(crate) length: u16,
}

impl fmt::Display for ResourceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dnsmessage.ResourceHeader{{Name: {}, Type: {}, Class: {}, TTL: {}, Length: {}}}",
            self.name, self.typ, self.class, self.ttl, self.length,
        )
    }
}

impl ResourceHeader {
    // pack appends the wire format of the header to msg and returns the
    // offset of the Length field so it can be fixed up once the body size
    // is known.
    pub(crate) fn pack(
        &self,
        mut msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<(Vec<u8>, usize)> {
        msg = self.name.pack(msg, compression, compression_off)?;
        msg = self.typ.pack(msg);
        msg = self.class.pack(msg);
        msg = pack_uint32(msg, self.ttl);
        let len_off = msg.len();
        msg = pack_uint16(msg, self.length);
        Ok((msg, len_off))
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let mut new_off = off;
        new_off = self.name.unpack(msg, new_off)?;
        new_off = self.typ.unpack(msg, new_off)?;
        new_off = self.class.unpack(msg, new_off)?;
        let (ttl, new_off) = unpack_uint32(msg, new_off)?;
        self.ttl = ttl;
        let (l, new_off) = unpack_uint16(msg, new_off)?;
        self.length = l;

        Ok(new_off)
    }

    // fix_len updates a packed header with the length of the body.
    //
    // len_off is the offset of the Length field in msg; pre_len is the
    // length msg had before the body was packed.
    pub(crate) fn fix_len(&mut self, msg: &mut [u8], len_off: usize, pre_len: usize) -> Result<()> {
        if msg.len() < pre_len || msg.len() > pre_len + u16::MAX as usize {
            return Err(Error::ErrResTooLong);
        }

        let con_len = msg.len() - pre_len;

        msg[len_off] = ((con_len >> 8) & 0xFF) as u8;
        msg[len_off + 1] = (con_len & 0xFF) as u8;
        self.length = con_len as u16;

        Ok(())
    }
}

// A ResourceBody is a DNS resource record minus the header.
//
// The record set an mDNS responder deals in is closed, so the dispatch is
// an enum; record types we do not interpret are carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourceBody {
    Aaaa(AaaaResource),
    Ptr(PtrResource),
    Srv(SrvResource),
    Txt(TxtResource),
    Key(KeyResource),
    Nsec(NsecResource),
    Unknown(Vec<u8>),
}

impl Default for ResourceBody {
    fn default() -> Self {
        ResourceBody::Unknown(Vec::new())
    }
}

impl ResourceBody {
    // real_type returns the actual type of the Resource, used to fill in
    // the header Type field.
    pub(crate) fn real_type(&self) -> DnsType {
        match self {
            ResourceBody::Aaaa(_) => DnsType::Aaaa,
            ResourceBody::Ptr(_) => DnsType::Ptr,
            ResourceBody::Srv(_) => DnsType::Srv,
            ResourceBody::Txt(_) => DnsType::Txt,
            ResourceBody::Key(_) => DnsType::Key,
            ResourceBody::Nsec(_) => DnsType::Nsec,
            ResourceBody::Unknown(_) => DnsType::Unsupported,
        }
    }

    // pack packs a Resource except for its header.
    pub(crate) fn pack(
        &self,
        msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        match self {
            ResourceBody::Aaaa(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Ptr(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Srv(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Txt(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Key(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Nsec(rb) => rb.pack(msg, compression, compression_off),
            ResourceBody::Unknown(data) => Ok(pack_bytes(msg, data)),
        }
    }

    /// The record data in canonical form for RFC 6762 §8.2.1 comparison:
    /// uncompressed, with names lowercased.
    pub(crate) fn canonical_rdata(&self) -> Vec<u8> {
        fn canonical_name(out: Vec<u8>, name: &Name) -> Vec<u8> {
            let lowered = Name {
                data: name.to_canonical(),
            };
            lowered.pack(out, &mut None, 0).unwrap_or_default()
        }

        match self {
            ResourceBody::Aaaa(rb) => rb.aaaa.to_vec(),
            ResourceBody::Ptr(rb) => canonical_name(Vec::new(), &rb.ptr),
            ResourceBody::Srv(rb) => {
                let mut out = Vec::new();
                out = pack_uint16(out, rb.priority);
                out = pack_uint16(out, rb.weight);
                out = pack_uint16(out, rb.port);
                canonical_name(out, &rb.target)
            }
            ResourceBody::Txt(rb) => rb.data.clone(),
            ResourceBody::Key(rb) => rb.data.clone(),
            ResourceBody::Nsec(rb) => rb.canonical_rdata(),
            ResourceBody::Unknown(data) => data.clone(),
        }
    }
}

pub(crate) fn unpack_resource_body(
    typ: DnsType,
    msg: &[u8],
    off: usize,
    length: usize,
) -> Result<(ResourceBody, usize)> {
    if off + length > msg.len() {
        return Err(Error::ErrResourceLen);
    }

    let body = match typ {
        DnsType::Aaaa => {
            let mut rb = AaaaResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Aaaa(rb)
        }
        DnsType::Ptr => {
            let mut rb = PtrResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Ptr(rb)
        }
        DnsType::Srv => {
            let mut rb = SrvResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Srv(rb)
        }
        DnsType::Txt => {
            let mut rb = TxtResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Txt(rb)
        }
        DnsType::Key => {
            let mut rb = KeyResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Key(rb)
        }
        DnsType::Nsec => {
            let mut rb = NsecResource::default();
            rb.unpack(msg, off, length)?;
            ResourceBody::Nsec(rb)
        }
        _ => ResourceBody::Unknown(msg[off..off + length].to_vec()),
    };

    Ok((body, off + length))
}
