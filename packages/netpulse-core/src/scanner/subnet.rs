//! Local subnet detection.
//!
//! The scan target is always the /24 around the address this host uses for
//! outbound traffic. Detection never fails; when nothing usable is found the
//! common home-router range is returned.

#[cfg(not(target_os = "windows"))]
use super::hidden_command_sync;
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

/// Used when every detection method fails.
pub const DEFAULT_SUBNET: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 0);

/// Routing decisions are made against this address; no packet is sent.
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

#[async_trait]
pub trait SubnetSource: Send + Sync {
    async fn detect(&self) -> Ipv4Network;
}

/// Detects the subnet from this machine's network configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSubnet;

#[async_trait]
impl SubnetSource for LocalSubnet {
    async fn detect(&self) -> Ipv4Network {
        tokio::task::spawn_blocking(|| detect_with(DETECTION_ORDER))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Subnet detection worker failed: {}", e);
                slash_24(DEFAULT_SUBNET)
            })
    }
}

/// A single way of finding this host's LAN address.
type DetectionStrategy = fn() -> Option<Ipv4Addr>;

const DETECTION_ORDER: &[DetectionStrategy] = &[outbound_ipv4, hostname_ipv4];

/// The /24 around the first usable address any strategy yields, in order.
fn detect_with(strategies: &[DetectionStrategy]) -> Ipv4Network {
    match strategies.iter().find_map(|strategy| strategy().filter(|ip| usable(*ip))) {
        Some(ip) => {
            let subnet = slash_24(ip);
            tracing::debug!("Local address {} -> subnet {}", ip, subnet);
            subnet
        }
        None => {
            tracing::warn!("Could not detect local IPv4 address, using {}/24", DEFAULT_SUBNET);
            slash_24(DEFAULT_SUBNET)
        }
    }
}

/// A fixed subnet, for pinned deployments and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSubnet(pub Ipv4Network);

#[async_trait]
impl SubnetSource for FixedSubnet {
    async fn detect(&self) -> Ipv4Network {
        self.0
    }
}

/// Zero the last octet and use a /24 prefix.
pub fn slash_24(ip: Ipv4Addr) -> Ipv4Network {
    let [a, b, c, _] = ip.octets();
    Ipv4Network::new(Ipv4Addr::new(a, b, c, 0), 24).expect("24 is a valid IPv4 prefix")
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified()
}

/// Address of the interface the OS would route external traffic through.
/// Connecting a UDP socket only selects a route.
fn outbound_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_PROBE_TARGET).ok()?;

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if usable(ip) => Some(ip),
        _ => None,
    }
}

/// First non-loopback IPv4 address the local hostname resolves to.
fn hostname_ipv4() -> Option<Ipv4Addr> {
    let hostname = get_local_hostname()?;
    first_usable_ipv4((hostname.as_str(), 0).to_socket_addrs().ok()?.map(|a| a.ip()))
}

fn first_usable_ipv4(candidates: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    candidates.into_iter().find_map(|ip| match ip {
        IpAddr::V4(v4) if usable(v4) => Some(v4),
        _ => None,
    })
}

/// Get the local machine's hostname
pub(crate) fn get_local_hostname() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("COMPUTERNAME").ok()
    }

    #[cfg(not(target_os = "windows"))]
    {
        hidden_command_sync("hostname")
            .output()
            .ok()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
