use std::collections::HashMap;

use super::super::name::*;
use shared::error::Result;

// A PtrResource is a PTR record pointing from a shared name (a service type)
// to its target (a service instance name).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct PtrResource {
    pub(crate) ptr: Name,
}

impl PtrResource {
    // pack appends the wire format of the PtrResource to msg.
    pub(crate) fn pack(
        &self,
        msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        self.ptr.pack(msg, compression, compression_off)
    }

    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize, _length: usize) -> Result<usize> {
        self.ptr.unpack(msg, off)
    }
}
