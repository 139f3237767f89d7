use std::collections::HashMap;

use super::super::packer::*;
use shared::error::Result;

// A TxtResource is a TXT record. The data is kept in its encoded form (a
// sequence of length-prefixed strings); registrations pass it through
// opaquely and an empty TXT is a single zero byte.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct TxtResource {
    pub(crate) data: Vec<u8>,
}

impl TxtResource {
    // pack appends the wire format of the TxtResource to msg.
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
