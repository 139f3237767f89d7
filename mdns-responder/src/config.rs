//! Configuration for the mDNS responder.
//!
//! [`ResponderConfig`] uses the builder pattern:
//!
//! ```rust
//! use mdns_responder::ResponderConfig;
//!
//! let config = ResponderConfig::default()
//!     .with_question_unicast_allowed(true)
//!     .with_max_message_size(512);
//! ```

use std::time::Duration;

/// Maximum size threshold for an outgoing mDNS message; larger responses
/// are split across packets with the TC flag set.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE: u16 = 1200;

/// Number of probe queries sent before a name is considered claimed.
pub(crate) const NUMBER_OF_PROBES: u8 = 3;

/// Upper bound of the random delay before the first probe.
pub(crate) const INITIAL_PROBE_JITTER: Duration = Duration::from_millis(20);

/// Interval between successive probe queries.
pub(crate) const PROBE_WAIT_TIME: Duration = Duration::from_millis(250);

/// Back-off before restarting probes after losing a simultaneous-probe tiebreak.
pub(crate) const PROBE_CONFLICT_WAIT_TIME: Duration = Duration::from_secs(1);

/// Number of unsolicited announcements after a name is claimed.
pub(crate) const NUMBER_OF_ANNOUNCES: u8 = 3;

/// Interval between the first two announcements; doubles afterwards.
pub(crate) const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// TTL used when a registration leaves the TTL unspecified (zero); applies
/// to host, service, and KEY records alike.
pub(crate) const DEFAULT_TTL: u32 = 120;

/// TTL for NSEC records asserting negative existence.
pub(crate) const NSEC_TTL: u32 = 4500;

/// TTL for the `_services._dns-sd._udp.local.` enumeration PTRs.
pub(crate) const SERVICES_PTR_TTL: u32 = 4500;

/// Bounds of the random delay applied to answers for shared records.
pub(crate) const MIN_RESPONSE_DELAY: Duration = Duration::from_millis(20);
pub(crate) const MAX_RESPONSE_DELAY: Duration = Duration::from_millis(120);

/// Minimum interval between multicasts of the same unique record.
pub(crate) const MIN_INTERVAL_BETWEEN_MULTICAST: Duration = Duration::from_secs(1);

/// Minimum interval between multicast responses to probes for the same record.
pub(crate) const MIN_INTERVAL_PROBE_RESPONSE: Duration = Duration::from_millis(250);

/// Age after which a record's last-multicast timestamp is considered stale.
pub(crate) const LAST_MULTICAST_AGE: Duration = Duration::from_secs(10 * 3600);

/// Settlement window for truncated multi-packet queries.
pub(crate) const MULTI_PACKET_MIN_DELAY: Duration = Duration::from_millis(400);
pub(crate) const MULTI_PACKET_MAX_DELAY: Duration = Duration::from_millis(500);

/// Hard cap on the number of messages held in one multi-packet bundle.
pub(crate) const MULTI_PACKET_MAX_MESSAGES: usize = 10;

/// How long a transmitted message digest is remembered for loopback detection.
pub(crate) const TX_HISTORY_EXPIRE_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a [`Responder`](crate::Responder).
///
/// # Fields
///
/// - `max_message_size`: outgoing message size threshold (default: 1200)
/// - `question_unicast_allowed`: whether the first probe may request a
///   unicast response ("QU" question, default: false)
/// - `default_ttl`: TTL applied when registrations pass zero (default: 120 s)
#[derive(Clone, Debug)]
pub struct ResponderConfig {
    /// Outgoing messages larger than this are split across packets with the
    /// truncation flag set on all but the last.
    ///
    /// Default: 1200 bytes. Mainly lowered in tests to exercise splitting.
    pub max_message_size: u16,

    /// Whether probe queries may set the unicast-response ("QU") bit.
    ///
    /// When allowed, the first probe of each entry is sent as a "QU"
    /// question. This can be used on platforms that cannot receive unicast
    /// responses on the mDNS port.
    ///
    /// Default: false
    pub question_unicast_allowed: bool,

    /// TTL used for records whose registration leaves the TTL unspecified.
    ///
    /// Default: 120 seconds
    pub default_ttl: u32,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            question_unicast_allowed: false,
            default_ttl: DEFAULT_TTL,
        }
    }
}

impl ResponderConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outgoing message size threshold.
    ///
    /// A value of zero falls back to the default (1200 bytes).
    pub fn with_max_message_size(mut self, max_message_size: u16) -> Self {
        self.max_message_size = if max_message_size == 0 {
            DEFAULT_MAX_MESSAGE_SIZE
        } else {
            max_message_size
        };
        self
    }

    /// Allows or forbids "QU" questions on the first probe.
    pub fn with_question_unicast_allowed(mut self, allowed: bool) -> Self {
        self.question_unicast_allowed = allowed;
        self
    }

    /// Sets the TTL used when registrations pass a zero TTL.
    pub fn with_default_ttl(mut self, ttl: u32) -> Self {
        self.default_ttl = if ttl == 0 { DEFAULT_TTL } else { ttl };
        self
    }
}
