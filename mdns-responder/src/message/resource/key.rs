use std::collections::HashMap;

use super::super::packer::*;
use shared::error::Result;

// A KeyResource is a KEY record (RFC 2930 wire form). The responder treats
// the key data as opaque bytes supplied by the registration.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeyResource {
    pub(crate) data: Vec<u8>,
}

impl KeyResource {
    // pack appends the wire format of the KeyResource to msg.
    pub(crate) fn pack(
        &self,
        msg: Vec<u8>,
        _compression: &mut Option<HashMap<String, usize>>,
        _compression_off: usize,
    ) -> Result<Vec<u8>> {
        Ok(pack_bytes(msg, &self.data))
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize, length: usize) -> Result<usize> {
        self.data = msg[off..off + length].to_vec();
        Ok(off + length)
    }
}
