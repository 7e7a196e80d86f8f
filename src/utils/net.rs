use std::net::{IpAddr, ToSocketAddrs, UdpSocket};

/// Resolve the local host's own address, once, for byte-direction
/// attribution. On multi-homed or dynamically addressed hosts the answer can
/// be wrong for some interfaces; that misattribution is a known limitation.
pub fn local_host_addr() -> Option<IpAddr> {
    if let Ok(hostname) = whoami::fallible::hostname() {
        if let Ok(mut addrs) = (hostname.as_str(), 0u16).to_socket_addrs() {
            if let Some(addr) = addrs.find(|a| !a.ip().is_loopback()) {
                return Some(addr.ip());
            }
        }
    }

    // Routing-table fallback; the socket never sends anything.
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("8.8.8.8", 80)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}
