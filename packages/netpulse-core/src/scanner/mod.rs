//! Network discovery.
//!
//! Finds live hosts on the local /24 using:
//! - subnet auto-detection
//! - ICMP ping sweep with a hard concurrency cap
//! - neighbor (ARP) table reading for hardware addresses
//! - reverse hostname resolution
//! - MAC OUI vendor lookup
//!
//! Each external collaborator sits behind a trait so the coordinator can be
//! driven with deterministic fakes.

pub mod hostname;
pub mod neighbor;
pub mod oui;
pub mod ping;
pub mod subnet;

pub use hostname::{HostnameResolver, SystemResolver};
pub use neighbor::{NeighborSource, NeighborTable, SystemNeighborTable, parse_neighbor_output};
pub use oui::VendorDirectory;
pub use ping::{PingProber, Prober, host_addresses};
pub use subnet::{FixedSubnet, LocalSubnet, SubnetSource};

use crate::config::ScanSettings;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create an async Command that hides the console window on Windows.
pub(crate) fn hidden_command(program: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Blocking variant for use inside `spawn_blocking`.
#[cfg(not(target_os = "windows"))]
pub(crate) fn hidden_command_sync(program: &str) -> std::process::Command {
    std::process::Command::new(program)
}

/// A host that answered during one sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostObservation {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub hostname: Option<String>,
}

/// Hostname lookups issued together.
const HOSTNAME_BATCH_SIZE: usize = 32;

/// The discovery collaborators used by one coordinator.
#[derive(Clone)]
pub struct NetworkScanner {
    subnets: Arc<dyn SubnetSource>,
    prober: Arc<dyn Prober>,
    neighbors: Arc<dyn NeighborSource>,
    resolver: Arc<dyn HostnameResolver>,
    concurrency: usize,
}

impl NetworkScanner {
    pub fn new(
        subnets: Arc<dyn SubnetSource>,
        prober: Arc<dyn Prober>,
        neighbors: Arc<dyn NeighborSource>,
        resolver: Arc<dyn HostnameResolver>,
        concurrency: usize,
    ) -> Self {
        Self {
            subnets,
            prober,
            neighbors,
            resolver,
            concurrency,
        }
    }

    /// OS-backed scanner: system ping, arp/ip neigh, resolver tools.
    pub fn system(settings: &ScanSettings) -> Self {
        Self::new(
            Arc::new(LocalSubnet),
            Arc::new(PingProber::new(settings.ping_timeout())),
            Arc::new(SystemNeighborTable::new()),
            Arc::new(SystemResolver::new(settings.hostname_timeout())),
            settings.concurrency,
        )
    }

    pub async fn detect_subnet(&self) -> Ipv4Network {
        self.subnets.detect().await
    }

    /// Responding addresses in enumeration order.
    pub async fn sweep(&self, subnet: Ipv4Network) -> Vec<Ipv4Addr> {
        ping::sweep(self.prober.clone(), subnet, self.concurrency).await
    }

    /// Rebuilt from scratch on every call.
    pub async fn read_neighbors(&self) -> NeighborTable {
        self.neighbors.read_table().await
    }

    /// Resolve hostnames concurrently in batches. The output is aligned
    /// with `ips`.
    pub async fn resolve_hostnames(&self, ips: &[Ipv4Addr]) -> Vec<Option<String>> {
        let mut hostnames = Vec::with_capacity(ips.len());

        for chunk in ips.chunks(HOSTNAME_BATCH_SIZE) {
            let lookups = chunk.iter().map(|ip| self.resolver.resolve(*ip));
            hostnames.extend(futures::future::join_all(lookups).await);
        }

        hostnames
    }

    /// Sweep, then attach hardware addresses and hostnames to the survivors.
    /// Hostnames are only looked up for hosts that have a hardware address.
    pub async fn discover(&self, subnet: Ipv4Network) -> Vec<HostObservation> {
        let alive = self.sweep(subnet).await;
        let neighbors = self.read_neighbors().await;
        self.observe(alive, &neighbors).await
    }

    pub(crate) async fn observe(
        &self,
        alive: Vec<Ipv4Addr>,
        neighbors: &NeighborTable,
    ) -> Vec<HostObservation> {
        let attributable: Vec<Ipv4Addr> = alive
            .iter()
            .copied()
            .filter(|ip| neighbors.contains_key(ip))
            .collect();
        let mut hostnames = self.resolve_hostnames(&attributable).await.into_iter();

        alive
            .into_iter()
            .map(|ip| match neighbors.get(&ip) {
                Some(mac) => HostObservation {
                    ip,
                    mac: Some(mac.clone()),
                    hostname: hostnames.next().flatten(),
                },
                None => HostObservation {
                    ip,
                    mac: None,
                    hostname: None,
                },
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Deterministic stand-ins for the OS collaborators.

    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    pub struct StaticProber {
        pub alive: HashSet<Ipv4Addr>,
        pub delay: Duration,
        pub started: Notify,
        pub calls: AtomicUsize,
    }

    impl StaticProber {
        pub fn new(alive: &[&str]) -> Self {
            Self {
                alive: alive.iter().map(|s| s.parse().unwrap()).collect(),
                delay: Duration::ZERO,
                started: Notify::new(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Prober for StaticProber {
        async fn probe(&self, ip: Ipv4Addr) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.alive.contains(&ip)
        }
    }

    pub struct StaticNeighbors(pub NeighborTable);

    impl StaticNeighbors {
        pub fn new(entries: &[(&str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(ip, mac)| (ip.parse().unwrap(), mac.to_string()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl NeighborSource for StaticNeighbors {
        async fn read_table(&self) -> NeighborTable {
            self.0.clone()
        }
    }

    pub struct StaticResolver(pub HashMap<Ipv4Addr, String>);

    impl StaticResolver {
        pub fn new(entries: &[(&str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(ip, name)| (ip.parse().unwrap(), name.to_string()))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl HostnameResolver for StaticResolver {
        async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
            self.0.get(&ip).cloned()
        }
    }

    pub fn scanner(
        subnet: &str,
        prober: Arc<StaticProber>,
        neighbors: StaticNeighbors,
        resolver: StaticResolver,
    ) -> NetworkScanner {
        NetworkScanner::new(
            Arc::new(FixedSubnet(subnet.parse().unwrap())),
            prober,
            Arc::new(neighbors),
            Arc::new(resolver),
            16,
        )
    }
}
