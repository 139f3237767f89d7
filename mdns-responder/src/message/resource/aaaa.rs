use std::collections::HashMap;
use std::net::Ipv6Addr;

use super::super::packer::*;
use shared::error::{Error, Result};

// An AaaaResource is an AAAA (IPv6 address) record.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct AaaaResource {
    pub(crate) aaaa: [u8; 16],
}

impl AaaaResource {
    pub(crate) fn from_addr(addr: Ipv6Addr) -> Self {
        Self {
            aaaa: addr.octets(),
        }
    }

    pub(crate) fn addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.aaaa)
    }

    // pack appends the wire format of the AaaaResource to msg.
    pub(crate) fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.aaaa))
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize, length: usize) -> Result<usize> {
        if length != self.aaaa.len() {
            return Err(Error::ErrBadRdata);
        }
        unpack_bytes(msg, off, &mut self.aaaa)
    }
}
