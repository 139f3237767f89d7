//! Socket utilities for mDNS.
//!
//! The responder core is sans-I/O; this module provides
//! [`MulticastSocket`], a builder for the properly configured UDP socket a
//! real deployment feeds it from.
//!
//! ```rust,ignore
//! use mdns_responder::MulticastSocket;
//!
//! let std_socket = MulticastSocket::new().into_std()?;
//! // For tokio:
//! let socket = tokio::net::UdpSocket::from_std(std_socket)?;
//! ```

use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::responder::{MDNS_MULTICAST_IPV6, MDNS_PORT};

/// A builder for UDP sockets suitable for mDNS.
///
/// The resulting socket is:
///
/// - bound to `[::]:5353` (configurable),
/// - configured with `SO_REUSEADDR` (and `SO_REUSEPORT` where supported),
/// - set to non-blocking mode for async compatibility,
/// - joined to the IPv6 mDNS multicast group (`ff02::fb`).
#[derive(Debug, Clone, Default)]
pub struct MulticastSocket {
    local_port: Option<u16>,
    interface: Option<u32>,
}

impl MulticastSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds to a non-standard local port; useful in tests running next to
    /// a system mDNS daemon.
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = Some(local_port);
        self
    }

    /// Joins the multicast group on a specific interface index instead of
    /// the default interface.
    pub fn with_interface(mut self, interface: u32) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Builds the configured `std::net::UdpSocket`.
    ///
    /// # Errors
    ///
    /// Fails when socket creation, binding, option setting, or joining the
    /// multicast group fails.
    pub fn into_std(self) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

        // Allow coexistence with other mDNS responders on the same host.
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(true)?;

        let local_port = self.local_port.unwrap_or(MDNS_PORT);
        let local_addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), local_port);
        socket.bind(&local_addr.into())?;

        let interface = self.interface.unwrap_or(0);
        socket.join_multicast_v6(&MDNS_MULTICAST_IPV6, interface)?;
        socket.set_multicast_loop_v6(true)?;

        Ok(socket.into())
    }
}
