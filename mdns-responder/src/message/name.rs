use std::collections::HashMap;
use std::fmt;

use shared::error::{Error, Result};

use super::packer::*;

/// Maximum presentation length of a DNS name, including the trailing dot.
pub(crate) const NAME_LEN: usize = 255;

// The largest offset a compression pointer can address.
const COMPRESSION_POINTER_MAX: usize = (1 << 14) - 1;

// How many compression pointers a decoder follows before giving up.
const MAX_POINTERS: usize = 10;

/// A DNS domain name in presentation form with a trailing dot
/// (e.g. `"myhost.local."`).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct Name {
    pub(crate) data: String,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl Name {
    pub(crate) fn new(data: &str) -> Result<Self> {
        let data = if data.ends_with('.') {
            data.to_owned()
        } else {
            format!("{data}.")
        };
        if data.len() > NAME_LEN {
            return Err(Error::ErrNameTooLong);
        }
        Ok(Name { data })
    }

    /// Case-insensitive name comparison (DNS names compare ASCII-insensitively).
    pub(crate) fn matches(&self, other: &str) -> bool {
        self.data.eq_ignore_ascii_case(other)
    }

    /// The name with all ASCII letters lowercased, used for canonical
    /// record-data comparison.
    pub(crate) fn to_canonical(&self) -> String {
        self.data.to_ascii_lowercase()
    }

    // pack appends the wire format of the name to msg, compressing domain
    // suffixes against earlier occurrences recorded in the compression map.
    // Offsets stored in the map are relative to compression_off.
    pub(crate) fn pack(
        &self,
        mut msg: Vec<u8>,
        compression: &mut Option<HashMap<String, usize>>,
        compression_off: usize,
    ) -> Result<Vec<u8>> {
        let data = self.data.as_bytes();

        // A trailing dot canonicalizes the name.
        if data.is_empty() || data[data.len() - 1] != b'.' {
            return Err(Error::ErrNonCanonicalName);
        }

        // Allow the root domain.
        if data == b"." {
            msg.push(0);
            return Ok(msg);
        }

        // Emit a sequence of counted strings, chopping at dots.
        let mut begin = 0;
        for i in 0..data.len() {
            if data[i] == b'.' {
                // The two most significant bits of a length byte have
                // special meaning; segments cannot be long enough to need
                // them.
                if i - begin >= 1 << 6 {
                    return Err(Error::ErrSegTooLong);
                }
                if i - begin == 0 {
                    return Err(Error::ErrZeroSegLen);
                }

                msg.push((i - begin) as u8);
                msg.extend_from_slice(&data[begin..i]);
                begin = i + 1;
                continue;
            }

            // Only domain suffixes starting at a new segment can be
            // compressed. A pointer is two bytes with the two most
            // significant bits set.
            if (i == 0 || data[i - 1] == b'.') && compression.is_some() {
                if let Some(compression) = compression {
                    let suffix = self.data[i..].to_ascii_lowercase();
                    if let Some(&ptr) = compression.get(&suffix) {
                        // Hit: emit a pointer instead of the rest of the name.
                        msg.push((ptr >> 8) as u8 | 0xC0);
                        msg.push(ptr as u8);
                        return Ok(msg);
                    }
                    // Miss: remember this suffix if the offset still fits
                    // in the 14 pointer bits.
                    if msg.len() - compression_off <= COMPRESSION_POINTER_MAX {
                        compression.insert(suffix, msg.len() - compression_off);
                    }
                }
            }
        }

        msg.push(0);
        Ok(msg)
    }

    // unpack parses a wire-format name starting at off, following
    // compression pointers. Pointers must point strictly backwards and at
    // most MAX_POINTERS are followed, which rejects cycles and forward
    // references.
    pub(crate) fn unpack(&mut self, msg: &[u8], off: usize) -> Result<usize> {
        // curr_off is the current working offset; new_off is where the next
        // field starts. Data reached through pointers belongs to other names
        // and does not count towards this one.
        let mut curr_off = off;
        let mut new_off = off;
        let mut ptr = 0;
        let mut name = String::with_capacity(NAME_LEN);

        loop {
            if curr_off >= msg.len() {
                return Err(Error::ErrBaseLen);
            }
            let c = msg[curr_off];
            curr_off += 1;
            match c & 0xC0 {
                0x00 => {
                    if c == 0x00 {
                        // A zero length byte ends the name.
                        break;
                    }
                    let end_off = curr_off + c as usize;
                    if end_off > msg.len() {
                        return Err(Error::ErrCalcLen);
                    }
                    for &b in &msg[curr_off..end_off] {
                        name.push(b as char);
                    }
                    name.push('.');
                    curr_off = end_off;
                }
                0xC0 => {
                    if curr_off >= msg.len() {
                        return Err(Error::ErrInvalidPtr);
                    }
                    let c1 = msg[curr_off];
                    curr_off += 1;
                    if ptr == 0 {
                        new_off = curr_off;
                    }
                    ptr += 1;
                    if ptr > MAX_POINTERS {
                        return Err(Error::ErrTooManyPtr);
                    }
                    let target = ((c ^ 0xC0) as usize) << 8 | c1 as usize;
                    // Pointers may only point backwards, which also rules
                    // out pointer loops.
                    if target >= curr_off - 2 {
                        return Err(Error::ErrInvalidPtr);
                    }
                    curr_off = target;
                }
                _ => {
                    // Prefixes 0x80 and 0x40 are reserved.
                    return Err(Error::ErrReserved);
                }
            }
        }

        if name.is_empty() {
            name.push('.');
        }
        if name.len() > NAME_LEN {
            return Err(Error::ErrCalcLen);
        }
        self.data = name;
        Ok(new_off)
    }

    pub(crate) fn skip(msg: &[u8], off: usize) -> Result<usize> {
        let mut new_off = off;
        loop {
            if new_off >= msg.len() {
                return Err(Error::ErrBaseLen);
            }
            let c = msg[new_off];
            new_off += 1;
            match c & 0xC0 {
                0x00 => {
                    if c == 0x00 {
                        return Ok(new_off);
                    }
                    new_off += c as usize;
                    if new_off > msg.len() {
                        return Err(Error::ErrCalcLen);
                    }
                }
                0xC0 => {
                    // A pointer ends the name.
                    return skip_uint16(msg, new_off - 1);
                }
                _ => return Err(Error::ErrReserved),
            }
        }
    }
}

/// Appends a single uncompressed label (which may itself contain dots, as
/// service instance labels can) to a wire buffer.
pub(crate) fn append_label(msg: &mut Vec<u8>, label: &str) -> Result<()> {
    let bytes = label.as_bytes();
    if bytes.is_empty() {
        return Err(Error::ErrZeroSegLen);
    }
    if bytes.len() >= 1 << 6 {
        return Err(Error::ErrSegTooLong);
    }
    msg.push(bytes.len() as u8);
    msg.extend_from_slice(bytes);
    Ok(())
}

/// Appends dot-separated labels (no trailing dot, no terminator) to a wire
/// buffer.
pub(crate) fn append_multiple_labels(msg: &mut Vec<u8>, labels: &str) -> Result<()> {
    for label in labels.split('.') {
        append_label(msg, label)?;
    }
    Ok(())
}

/// Appends a compression pointer to a previously emitted name.
pub(crate) fn append_pointer_label(msg: &mut Vec<u8>, offset: u16) {
    msg.push((offset >> 8) as u8 | 0xC0);
    msg.push(offset as u8);
}
