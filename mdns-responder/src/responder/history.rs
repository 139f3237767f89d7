//! Transmitted-message history.
//!
//! Multicast delivery loops our own packets back to us, and the platform
//! does not reliably indicate which received datagrams are ours. Every
//! transmitted multicast is therefore remembered as a SHA-256 digest for a
//! short window; a received message whose digest is present is ours and is
//! dropped. Lookup is a linear scan over a handful of entries.

use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::config::TX_HISTORY_EXPIRE_INTERVAL;

type Hash = [u8; 32];

struct HashEntry {
    hash: Hash,
    expire_time: Instant,
}

#[derive(Default)]
pub(crate) struct TxMessageHistory {
    entries: Vec<HashEntry>,
}

impl TxMessageHistory {
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn add(&mut self, message: &[u8], now: Instant) {
        let hash = calculate_hash(message);
        let expire_time = now + TX_HISTORY_EXPIRE_INTERVAL;

        match self.entries.iter_mut().find(|entry| entry.hash == hash) {
            Some(entry) => entry.expire_time = expire_time,
            None => self.entries.push(HashEntry { hash, expire_time }),
        }
    }

    pub(crate) fn contains(&self, message: &[u8]) -> bool {
        let hash = calculate_hash(message);
        self.entries.iter().any(|entry| entry.hash == hash)
    }

    pub(crate) fn remove_expired(&mut self, now: Instant) {
        self.entries.retain(|entry| entry.expire_time > now);
    }

    pub(crate) fn next_fire_time(&self) -> Option<Instant> {
        self.entries.iter().map(|entry| entry.expire_time).min()
    }
}

fn calculate_hash(message: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(message);
    hasher.finalize().into()
}
