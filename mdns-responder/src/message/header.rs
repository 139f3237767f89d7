use std::fmt;

use shared::error::{Error, Result};

use super::packer::*;
use super::{HEADER_BIT_AA, HEADER_BIT_QR, HEADER_BIT_TC, RCode};

/// A DNS message header.
///
/// mDNS constrains the header: the id is zero on multicast messages, the
/// opcode must be zero (standard query), and responses always carry the
/// authoritative bit.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) id: u16,
    pub(crate) response: bool,
    pub(crate) op_code: u16,
    pub(crate) authoritative: bool,
    pub(crate) truncated: bool,
    pub(crate) rcode: RCode,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dnsmessage.Header{{id: {}, response: {}, op_code: {}, authoritative: {}, truncated: {}, rcode: {}}}",
            self.id, self.response, self.op_code, self.authoritative, self.truncated, self.rcode
        )
    }
}

impl Header {
    // pack produces the id and flag-bits words of the wire header.
    pub(crate) fn pack(&self) -> (u16, u16) {
        let mut bits = self.op_code << 11 | self.rcode as u16;
        if self.response {
            bits |= HEADER_BIT_QR;
        }
        if self.authoritative {
            bits |= HEADER_BIT_AA;
        }
        if self.truncated {
            bits |= HEADER_BIT_TC;
        }
        (self.id, bits)
    }

    pub(crate) fn set_from(&mut self, id: u16, bits: u16) {
        self.id = id;
        self.response = bits & HEADER_BIT_QR != 0;
        self.op_code = (bits >> 11) & 0xF;
        self.authoritative = bits & HEADER_BIT_AA != 0;
        self.truncated = bits & HEADER_BIT_TC != 0;
        self.rcode = RCode::from((bits & 0xF) as u8);
    }
}

// HeaderInternal is the wire header with section counts, packed as six
// big-endian words.
#[derive(Default, Debug, Clone)]
pub(crate) struct HeaderInternal {
    pub(crate) id: u16,
    pub(crate) bits: u16,
    pub(crate) questions: u16,
    pub(crate) answers: u16,
    pub(crate) authorities: u16,
    pub(crate) additionals: u16,
}

impl HeaderInternal {
    pub(crate) fn pack(&self, mut msg: Vec<u8>) -> Vec<u8> {
        msg = pack_uint16(msg, self.id);
        msg = pack_uint16(msg, self.bits);
        msg = pack_uint16(msg, self.questions);
        msg = pack_uint16(msg, self.answers);
        msg = pack_uint16(msg, self.authorities);
        msg = pack_uint16(msg, self.additionals);
        msg
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        let (id, off) = unpack_uint16(msg, off).map_err(|_| Error::ErrBaseLen)?;
        self.id = id;
        let (bits, off) = unpack_uint16(msg, off)?;
        self.bits = bits;
        let (questions, off) = unpack_uint16(msg, off)?;
        self.questions = questions;
        let (answers, off) = unpack_uint16(msg, off)?;
        self.answers = answers;
        let (authorities, off) = unpack_uint16(msg, off)?;
        self.authorities = authorities;
        let (additionals, off) = unpack_uint16(msg, off)?;
        self.additionals = additionals;
        Ok(off)
    }
}
