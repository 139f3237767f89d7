//! Multi-packet query buffering.
//!
//! A query too large for one packet arrives truncated (TC=1), with its
//! known answers continuing in follow-up packets that carry no questions.
//! Packets are bundled by sender address and the bundle is processed as one
//! logical query once it settles: 400-500 ms (randomized) after the last
//! truncated arrival, or immediately once the bundle hits its size cap.

use std::net::SocketAddr;
use std::time::Instant;

use crate::config::{MULTI_PACKET_MAX_DELAY, MULTI_PACKET_MAX_MESSAGES, MULTI_PACKET_MIN_DELAY};
use crate::responder::RxMessage;
use crate::responder::entry::random_duration;

pub(crate) struct RxMsgBundle {
    pub(crate) process_time: Instant,
    pub(crate) rx_messages: Vec<RxMessage>,
}

impl RxMsgBundle {
    fn sender(&self) -> Option<SocketAddr> {
        self.rx_messages.first().map(|rx| rx.sender)
    }

    fn add(&mut self, rx: RxMessage, now: Instant) {
        // A follow-up that is itself truncated delays processing again. The
        // message cap bounds how long a sender can keep pushing the
        // deadline out.
        if self.rx_messages.len() >= MULTI_PACKET_MAX_MESSAGES {
            return;
        }

        self.process_time = if rx.truncated {
            now + random_duration(MULTI_PACKET_MIN_DELAY, MULTI_PACKET_MAX_DELAY)
        } else {
            now
        };

        // The first query, carrying the questions, stays at the head.
        self.rx_messages.push(rx);
    }
}

#[derive(Default)]
pub(crate) struct MultiPacketRxMessages {
    bundles: Vec<RxMsgBundle>,
}

impl MultiPacketRxMessages {
    pub(crate) fn clear(&mut self) {
        self.bundles.clear();
    }

    /// Attaches a continuation packet (no questions, only known answers) to
    /// the bundle from the same sender, if one exists.
    pub(crate) fn add_to_existing(&mut self, rx: RxMessage, now: Instant) {
        if let Some(bundle) = self
            .bundles
            .iter_mut()
            .find(|bundle| bundle.sender() == Some(rx.sender))
        {
            bundle.add(rx, now);
        }
    }

    /// Starts a new bundle headed by a truncated query, replacing any
    /// previous bundle from the same sender.
    pub(crate) fn add_new(&mut self, rx: RxMessage, now: Instant) {
        self.bundles
            .retain(|bundle| bundle.sender() != Some(rx.sender));

        let mut bundle = RxMsgBundle {
            process_time: now,
            rx_messages: Vec::new(),
        };
        bundle.add(rx, now);
        self.bundles.push(bundle);
    }

    /// Removes and returns the bundles whose settlement window has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<RxMsgBundle> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.bundles.len() {
            if self.bundles[i].process_time <= now {
                expired.push(self.bundles.remove(i));
            } else {
                i += 1;
            }
        }
        expired
    }

    pub(crate) fn next_fire_time(&self) -> Option<Instant> {
        self.bundles.iter().map(|bundle| bundle.process_time).min()
    }
}
