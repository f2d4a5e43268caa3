use std::net::{IpAddr, SocketAddr, UdpSocket};

use str0m::Candidate;
use systemstat::{Platform, System};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::SessionError;

/// Install the global fmt subscriber. `RUST_LOG` wins over `level`.
pub fn init_log(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A second init (tests, embedding) is harmless.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Asks the OS for the address of its default route first, then falls back to
/// iterating over all interfaces provided by `systemstat`, skipping any
/// loopback, link-local or broadcast addresses.
///
/// ## Returns
///
/// * `Some(IpAddr)`: The first routable address.
/// * `None`: The host exposes no usable IPv4 address.
pub fn select_host_address() -> Option<IpAddr> {
    if let Ok(IpAddr::V4(v)) = local_ip_address::local_ip() {
        if is_routable(&v) {
            return Some(IpAddr::V4(v));
        }
    }

    let system = System::new();
    let networks = system.networks().ok()?;

    for net in networks.values() {
        for n in &net.addrs {
            if let systemstat::IpAddr::V4(v) = n.addr {
                if is_routable(&v) {
                    debug!("iface: {} / {}", net.name, v);
                    return Some(IpAddr::V4(v));
                }
            }
        }
    }

    None
}

fn is_routable(v: &std::net::Ipv4Addr) -> bool {
    !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() && !v.is_unspecified()
}

/// Bind the session's UDP socket and build the matching host candidate.
///
/// `bind` overrides address selection; without it the host address is chosen
/// by [`select_host_address`].
pub fn bind_host_socket(bind: Option<IpAddr>) -> Result<(UdpSocket, Candidate), SessionError> {
    let ip = bind.or_else(select_host_address).ok_or_else(|| {
        SessionError::OfferGenerationFailed("found no usable network interface".to_string())
    })?;

    let socket = UdpSocket::bind(SocketAddr::new(ip, 0))
        .map_err(|e| SessionError::OfferGenerationFailed(format!("binding UDP socket: {e}")))?;
    let addr = socket
        .local_addr()
        .map_err(|e| SessionError::OfferGenerationFailed(e.to_string()))?;
    info!("Bound UDP port: {}", addr);

    let candidate = Candidate::host(addr, str0m::net::Protocol::Udp)
        .map_err(|e| SessionError::OfferGenerationFailed(format!("host candidate: {e}")))?;

    Ok((socket, candidate))
}
