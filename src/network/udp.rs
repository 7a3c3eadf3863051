//! UDP socket setup
//!
//! Sockets are built with socket2 so QoS marking, multicast scope and
//! address reuse can be set before they are handed over as std sockets.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::NetworkError;

/// Resolve `host:port`, preferring the first address returned
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::AddressResolution(format!("{}: {}", host, e)))?
        .next()
        .ok_or_else(|| NetworkError::AddressResolution(format!("{}: no addresses", host)))
}

fn new_socket(addr: &SocketAddr) -> Result<Socket, NetworkError> {
    Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}

fn unspecified(addr: &SocketAddr, port: u16) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
    }
}

/// Socket for sending to `remote`, bound to an ephemeral local port
pub fn create_send_socket(remote: &SocketAddr, dscp: u8, multicast_ttl: u32) -> Result<UdpSocket, NetworkError> {
    let socket = new_socket(remote)?;

    if remote.is_ipv4() {
        // DSCP occupies the upper six bits of the TOS byte
        if let Err(e) = socket.set_tos((dscp as u32) << 2) {
            tracing::warn!("Failed to set DSCP {}: {}", dscp, e);
        }
    }

    match remote.ip() {
        IpAddr::V4(ip) if ip.is_multicast() => socket
            .set_multicast_ttl_v4(multicast_ttl)
            .map_err(|e| NetworkError::BindFailed(format!("multicast TTL: {}", e)))?,
        IpAddr::V6(ip) if ip.is_multicast() => socket
            .set_multicast_hops_v6(multicast_ttl)
            .map_err(|e| NetworkError::BindFailed(format!("multicast hops: {}", e)))?,
        _ => {}
    }

    socket
        .bind(&SockAddr::from(unspecified(remote, 0)))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}

/// Non-blocking socket receiving on `local`; multicast groups are joined
pub fn create_receive_socket(local: &SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = new_socket(local)?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let bind_addr = if local.ip().is_multicast() {
        unspecified(local, local.port())
    } else {
        *local
    };
    socket
        .bind(&SockAddr::from(bind_addr))
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", bind_addr, e)))?;

    match local.ip() {
        IpAddr::V4(group) if group.is_multicast() => socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|e| NetworkError::BindFailed(format!("join {}: {}", group, e)))?,
        IpAddr::V6(group) if group.is_multicast() => socket
            .join_multicast_v6(&group, 0)
            .map_err(|e| NetworkError::BindFailed(format!("join {}: {}", group, e)))?,
        _ => {}
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}
