//! Address resolution helpers for the local transport

use crate::server::transport::TransportError;
use std::io;
use std::net::{IpAddr, UdpSocket};
use tracing::{debug, warn};

pub const LOOPBACK: &str = "127.0.0.1";

/// Any public address works, connecting a UDP socket sends no packets
const ROUTE_PROBE: &str = "8.8.8.8:80";

/// `host:port`, with bare IPv6 literals bracketed so the result is URL-safe
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// One address of one network interface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub ip: IpAddr,
    pub loopback: bool,
    pub up: bool,
}

pub fn interface_addresses() -> io::Result<Vec<InterfaceAddress>> {
    Ok(if_addrs::get_if_addrs()?
        .into_iter()
        .map(|interface| InterfaceAddress {
            ip: interface.ip(),
            loopback: interface.is_loopback(),
            up: interface.is_oper_up(),
        })
        .collect())
}

/// Address of the interface the OS would route outbound traffic through
pub fn outbound_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE)?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no operational non-loopback interface",
        ));
    }
    Ok(ip)
}

/// First operational, non-loopback IPv4 interface address.
///
/// When several qualify, the one outbound traffic is routed through wins.
pub fn pick_interface_ip(
    interfaces: &[InterfaceAddress],
    routed: Option<IpAddr>,
) -> Option<IpAddr> {
    let mut candidates = interfaces
        .iter()
        .filter(|interface| interface.up && !interface.loopback && interface.ip.is_ipv4())
        .map(|interface| interface.ip)
        .peekable();
    let first = *candidates.peek()?;
    Some(
        routed
            .filter(|routed| candidates.any(|ip| ip == *routed))
            .unwrap_or(first),
    )
}

/// Network address advertised next to loopback, if this machine has one
pub fn network_ip() -> Option<IpAddr> {
    let interfaces = interface_addresses().unwrap_or_else(|e| {
        warn!(error = %e, "Could not list network interfaces");
        Vec::new()
    });
    let routed = outbound_ip()
        .inspect_err(|e| debug!(error = %e, "No outbound route"))
        .ok();
    pick_interface_ip(&interfaces, routed).or(routed)
}

/// Map a failed bind to a transport error, separating "address unavailable"
/// class failures from everything else
pub fn classify_bind_error(address: &str, error: io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied => TransportError::AddressUnavailable {
            address: address.to_string(),
            source: error,
        },
        _ => TransportError::Bind {
            address: address.to_string(),
            source: error,
        },
    }
}

/// `host:port` strings the server is reachable at.
///
/// An empty host yields loopback followed by the network address, so the
/// network one is the default.
pub fn resolve_hosts(host: &str, port: u16) -> Vec<String> {
    resolve_hosts_with(host, port, network_ip)
}

fn resolve_hosts_with(
    host: &str,
    port: u16,
    network: impl FnOnce() -> Option<IpAddr>,
) -> Vec<String> {
    if !host.is_empty() {
        return vec![host_port(host, port)];
    }

    let mut hosts = vec![host_port(LOOPBACK, port)];
    match network() {
        Some(ip) => hosts.push(host_port(&ip.to_string(), port)),
        None => warn!("No network interface address found, only loopback is advertised"),
    }
    hosts
}
