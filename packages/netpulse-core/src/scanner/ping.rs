//! Ping sweep using the system ping command.

use super::hidden_command;
use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Extra time allowed for the ping process itself to start and exit.
const PROCESS_GRACE: Duration = Duration::from_millis(500);

/// Single-address reachability check.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `true` only when the host answered; every failure is `false`.
    async fn probe(&self, ip: Ipv4Addr) -> bool;
}

/// One echo request through the OS `ping` binary, no retries.
#[derive(Debug, Clone)]
pub struct PingProber {
    timeout: Duration,
}

impl PingProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, ip: Ipv4Addr) -> bool {
        let output = hidden_command("ping")
            .args(ping_args(ip, self.timeout))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout + PROCESS_GRACE, output).await {
            Ok(Ok(output)) => {
                reply_received(output.status.success(), &String::from_utf8_lossy(&output.stdout))
            }
            Ok(Err(e)) => {
                tracing::trace!("ping {} failed to run: {}", ip, e);
                false
            }
            Err(_) => {
                tracing::trace!("ping {} exceeded {:?}", ip, self.timeout + PROCESS_GRACE);
                false
            }
        }
    }
}

/// Arguments for exactly one echo request with a per-attempt timeout.
pub(crate) fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);

    #[cfg(target_os = "windows")]
    let args = vec!["-n".to_string(), "1".to_string(), "-w".to_string(), millis.to_string()];

    // macOS takes -W in milliseconds
    #[cfg(target_os = "macos")]
    let args = vec!["-c".to_string(), "1".to_string(), "-W".to_string(), millis.to_string()];

    // iputils/busybox take -W in whole seconds
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let args = vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        millis.div_ceil(1000).to_string(),
    ];

    let mut args = args;
    args.push(ip.to_string());
    args
}

/// Windows ping exits 0 for "destination host unreachable", so the reply
/// text has to be checked there.
fn reply_received(exit_success: bool, stdout: &str) -> bool {
    #[cfg(target_os = "windows")]
    {
        let lower = stdout.to_lowercase();
        exit_success
            && lower.contains("reply from")
            && !lower.contains("destination host unreachable")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = stdout;
        exit_success
    }
}

/// Usable host addresses of a subnet.
///
/// Network and broadcast addresses are excluded for prefixes shorter than
/// /31; /31 and /32 networks have no such addresses to exclude.
pub fn host_addresses(subnet: Ipv4Network) -> impl Iterator<Item = Ipv4Addr> {
    let network = subnet.network();
    let broadcast = subnet.broadcast();
    let point_to_point = subnet.prefix() >= 31;

    subnet
        .iter()
        .filter(move |ip| point_to_point || (*ip != network && *ip != broadcast))
}

/// Probe every usable address of `subnet` with at most `concurrency` probes
/// in flight, returning the responders in address order.
pub async fn sweep(prober: Arc<dyn Prober>, subnet: Ipv4Network, concurrency: usize) -> Vec<Ipv4Addr> {
    let start = Instant::now();
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut probed = 0usize;

    for ip in host_addresses(subnet) {
        // Waiting here keeps the number of spawned probes at the cap.
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let prober = prober.clone();
        tasks.spawn(async move {
            let _permit = permit;
            prober.probe(ip).await.then_some(ip)
        });
        probed += 1;
    }

    let mut alive = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(ip)) => alive.push(ip),
            Ok(None) => {}
            Err(e) => tracing::debug!("Probe task failed: {}", e),
        }
    }
    alive.sort();

    tracing::info!(
        "Ping sweep of {}: {}/{} hosts responding in {:.1}s",
        subnet,
        alive.len(),
        probed,
        start.elapsed().as_secs_f64()
    );

    alive
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn net(s: &str) -> Ipv4Network {
        s.parse().unwrap()
    }

    /// Marks a fixed set alive and records the peak number of concurrent probes.
    struct CountingProber {
        alive: HashSet<Ipv4Addr>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingProber {
        fn new(alive: &[&str]) -> Self {
            Self {
                alive: alive.iter().map(|s| s.parse().unwrap()).collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, ip: Ipv4Addr) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.alive.contains(&ip)
        }
    }

    #[test]
    fn test_host_address_counts() {
        assert_eq!(host_addresses(net("192.168.1.0/24")).count(), 254);
        assert_eq!(host_addresses(net("10.0.0.0/30")).count(), 2);
        assert_eq!(host_addresses(net("10.0.0.0/29")).count(), 6);
        assert_eq!(host_addresses(net("172.16.0.0/22")).count(), 1022);
        for prefix in 16..31u8 {
            let subnet = Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), prefix).unwrap();
            assert_eq!(
                host_addresses(subnet).count() as u64,
                2u64.pow(32 - prefix as u32) - 2,
                "prefix /{}",
                prefix
            );
        }
    }

    #[test]
    fn test_host_addresses_exclude_network_and_broadcast() {
        let hosts: Vec<Ipv4Addr> = host_addresses(net("10.0.0.0/30")).collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);

        let hosts: Vec<Ipv4Addr> = host_addresses(net("192.168.7.0/24")).collect();
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 7, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 7, 254)));
    }

    #[test]
    fn test_point_to_point_networks() {
        assert_eq!(host_addresses(net("10.0.0.0/31")).count(), 2);
        assert_eq!(host_addresses(net("10.0.0.5/32")).count(), 1);
    }

    #[test]
    fn test_ping_args_single_attempt() {
        let args = ping_args(Ipv4Addr::new(192, 168, 1, 1), Duration::from_millis(800));
        assert_eq!(args.last().map(String::as_str), Some("192.168.1.1"));

        #[cfg(target_os = "windows")]
        assert_eq!(args, vec!["-n", "1", "-w", "800", "192.168.1.1"]);

        #[cfg(target_os = "macos")]
        assert_eq!(args, vec!["-c", "1", "-W", "800", "192.168.1.1"]);

        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        assert_eq!(args, vec!["-c", "1", "-W", "1", "192.168.1.1"]);
    }

    #[tokio::test]
    async fn test_sweep_respects_concurrency_cap() {
        let prober = Arc::new(CountingProber::new(&["192.168.1.10", "192.168.1.200"]));
        let alive = sweep(prober.clone(), net("192.168.1.0/24"), 8).await;

        assert_eq!(
            alive,
            vec![Ipv4Addr::new(192, 168, 1, 10), Ipv4Addr::new(192, 168, 1, 200)]
        );
        assert_eq!(prober.calls.load(Ordering::SeqCst), 254);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 8, "peak concurrency was {}", peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_cap_holds_on_multi_thread_runtime() {
        let prober = Arc::new(CountingProber::new(&[]));
        let alive = sweep(prober.clone(), net("10.20.0.0/23"), 16).await;

        assert!(alive.is_empty());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 510);
        assert!(prober.peak.load(Ordering::SeqCst) <= 16);
    }

    #[tokio::test]
    async fn test_sweep_zero_concurrency_still_progresses() {
        let prober = Arc::new(CountingProber::new(&["10.0.0.2"]));
        let alive = sweep(prober.clone(), net("10.0.0.0/30"), 0).await;
        assert_eq!(alive, vec![Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ping_prober_unreachable_is_false() {
        // TEST-NET-1 is reserved and never answers.
        let prober = PingProber::new(Duration::from_millis(200));
        assert!(!prober.probe(Ipv4Addr::new(192, 0, 2, 1)).await);
    }
}
