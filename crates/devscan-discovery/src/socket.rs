//! UDP socket setup shared by the multicast transports.

use crate::error::{DiscoveryError, Result};
use if_addrs::IfAddr;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Maximum datagram we expect on any discovery channel
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65_507;

/// First pause after a failed receive
const RECV_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Longest pause between receive attempts on a failing socket
const RECV_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Pause before the next receive after `consecutive_errors` failures in a row.
/// Doubles from 50ms and saturates at 5s.
pub(crate) fn recv_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    RECV_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(RECV_BACKOFF_MAX)
}

/// Binds a reusable, non-blocking UDP socket and hands it to tokio.
///
/// Must be called from within a tokio runtime.
pub(crate) fn bind_udp(addr: SocketAddrV4) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::bind_failed(addr, e))?;

    // Several scanners (or other tools) may share the well-known ports
    socket
        .set_reuse_address(true)
        .map_err(|e| DiscoveryError::bind_failed(addr, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::bind_failed(addr, e))?;
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|e| DiscoveryError::bind_failed(addr, e))?;

    UdpSocket::from_std(socket.into()).map_err(|e| DiscoveryError::bind_failed(addr, e))
}

/// Addresses of every active, non-loopback IPv4 interface.
pub(crate) fn multicast_interfaces() -> Vec<Ipv4Addr> {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| match iface.addr {
                IfAddr::V4(v4) => Some(v4.ip),
                IfAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            Vec::new()
        }
    }
}

/// Joins `group` on every usable interface and returns how many joins
/// succeeded. Per-interface failures are logged and skipped; when no
/// interface accepts the membership the default interface is tried once.
pub(crate) fn join_group(socket: &UdpSocket, group: Ipv4Addr) -> usize {
    let mut joined = 0;

    for interface in multicast_interfaces() {
        match socket.join_multicast_v4(group, interface) {
            Ok(()) => {
                debug!(%group, %interface, "Joined multicast group");
                joined += 1;
            }
            Err(e) => {
                warn!(%group, %interface, error = %e, "Multicast join failed, skipping interface");
            }
        }
    }

    if joined == 0 {
        match socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
            Ok(()) => {
                debug!(%group, "Joined multicast group on default interface");
                joined = 1;
            }
            Err(e) => {
                warn!(%group, error = %e, "No multicast membership, only unicast traffic will arrive");
            }
        }
    }

    joined
}
