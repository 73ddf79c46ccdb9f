//! Reverse hostname resolution.
//!
//! Lookups shell out to the system resolver tools as async child processes.
//! Each strategy is tried in order and the first non-empty name wins. The
//! whole chain runs under one timeout and an abandoned lookup kills the tool
//! it was waiting on.

use super::hidden_command;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// `None` on any failure.
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Stands in for the address in a strategy's arguments.
const IP_PLACEHOLDER: &str = "{ip}";

/// Resolves through the OS tools with an upper bound per address.
#[derive(Debug, Clone)]
pub struct SystemResolver {
    timeout: Duration,
    strategies: Vec<Strategy>,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self::with_strategies(timeout, default_strategies())
    }

    fn with_strategies(timeout: Duration, strategies: Vec<Strategy>) -> Self {
        Self { timeout, strategies }
    }

    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let ip_str = ip.to_string();
        for strategy in &self.strategies {
            if let Some(name) = strategy.run(&ip_str).await {
                return Some(name);
            }
        }
        None
    }
}

#[async_trait]
impl HostnameResolver for SystemResolver {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.reverse_lookup(ip)).await {
            Ok(hostname) => hostname,
            Err(_) => {
                tracing::debug!("Hostname lookup for {} timed out", ip);
                None
            }
        }
    }
}

/// One way of turning an address into a name.
#[derive(Debug, Clone)]
struct Strategy {
    program: String,
    args: Vec<String>,
    parse: fn(&str) -> Option<String>,
    /// Some tools print useful output even on a non-zero exit.
    needs_success: bool,
}

impl Strategy {
    fn new(program: &str, args: &[&str], parse: fn(&str) -> Option<String>) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            parse,
            needs_success: true,
        }
    }

    #[cfg(target_os = "windows")]
    fn accept_failure(mut self) -> Self {
        self.needs_success = false;
        self
    }

    async fn run(&self, ip: &str) -> Option<String> {
        let output = hidden_command(&self.program)
            .args(self.args.iter().map(|arg| arg.replace(IP_PLACEHOLDER, ip)))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::trace!("{} failed to run: {}", self.program, e);
                return None;
            }
        };
        if self.needs_success && !output.status.success() {
            return None;
        }
        (self.parse)(&String::from_utf8_lossy(&output.stdout))
            .filter(|name| !name.is_empty() && name != ip)
    }
}

#[cfg(not(target_os = "windows"))]
fn default_strategies() -> Vec<Strategy> {
    let mut strategies = vec![
        Strategy::new("getent", &["hosts", IP_PLACEHOLDER], parse_getent),
        Strategy::new("host", &[IP_PLACEHOLDER], parse_host),
    ];
    #[cfg(target_os = "linux")]
    strategies.push(Strategy::new("avahi-resolve", &["-a", IP_PLACEHOLDER], parse_avahi));
    strategies
}

#[cfg(target_os = "windows")]
fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy::new(
            "powershell",
            &[
                "-NoProfile",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                "try { (Resolve-DnsName -Name '{ip}' -Type PTR -ErrorAction Stop).NameHost } catch { }",
            ],
            parse_plain,
        ),
        Strategy::new("nbtstat", &["-A", IP_PLACEHOLDER], parse_nbtstat).accept_failure(),
    ]
}

/// `192.168.1.1     router.lan`
#[cfg(any(not(target_os = "windows"), test))]
fn parse_getent(out: &str) -> Option<String> {
    out.split_whitespace().nth(1).map(str::to_string)
}

/// `1.1.168.192.in-addr.arpa domain name pointer router.lan.`
#[cfg(any(not(target_os = "windows"), test))]
fn parse_host(out: &str) -> Option<String> {
    let name = out.split("pointer").nth(1)?.split_whitespace().next()?;
    Some(name.trim_end_matches('.').to_string())
}

/// `192.168.1.20	printer.local`
#[cfg(any(target_os = "linux", test))]
fn parse_avahi(out: &str) -> Option<String> {
    out.split_whitespace().nth(1).map(str::to_string)
}

#[cfg(any(target_os = "windows", test))]
fn parse_plain(out: &str) -> Option<String> {
    let name = out.trim();
    (!name.is_empty() && !name.to_lowercase().contains("error")).then(|| name.to_string())
}

/// First unique `<00>` NetBIOS name.
#[cfg(any(target_os = "windows", test))]
fn parse_nbtstat(out: &str) -> Option<String> {
    out.lines()
        .map(str::trim)
        .find(|line| line.contains("<00>") && line.contains("UNIQUE"))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent() {
        assert_eq!(
            parse_getent("192.168.1.1     router.lan router\n").as_deref(),
            Some("router.lan")
        );
        assert_eq!(parse_getent(""), None);
    }

    #[test]
    fn test_parse_host() {
        assert_eq!(
            parse_host("1.1.168.192.in-addr.arpa domain name pointer router.lan.\n").as_deref(),
            Some("router.lan")
        );
        assert_eq!(parse_host("Host 9.1.168.192.in-addr.arpa. not found: 3(NXDOMAIN)"), None);
    }

    #[test]
    fn test_parse_avahi() {
        assert_eq!(
            parse_avahi("192.168.1.20\tprinter.local\n").as_deref(),
            Some("printer.local")
        );
        assert_eq!(parse_avahi(""), None);
    }

    #[test]
    fn test_parse_nbtstat() {
        let out = "\
    NetBIOS Remote Machine Name Table

       Name               Type         Status
    ---------------------------------------------
    DESKTOP-42     <00>  UNIQUE      Registered
    WORKGROUP      <00>  GROUP       Registered
";
        assert_eq!(parse_nbtstat(out).as_deref(), Some("DESKTOP-42"));
        assert_eq!(parse_nbtstat("Host not found."), None);
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(parse_plain("nas.home\r\n").as_deref(), Some("nas.home"));
        assert_eq!(parse_plain("   "), None);
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_none_not_error() {
        // TEST-NET-2 has no PTR records.
        let resolver = SystemResolver::new(Duration::from_millis(500));
        let name = resolver.resolve(Ipv4Addr::new(198, 51, 100, 77)).await;
        assert_ne!(name.as_deref(), Some("198.51.100.77"));
        assert_ne!(name.as_deref(), Some(""));
    }

    #[test]
    fn test_default_strategies_substitute_the_address() {
        let args: Vec<String> = default_strategies()[0]
            .args
            .iter()
            .map(|arg| arg.replace(IP_PLACEHOLDER, "10.0.0.7"))
            .collect();
        assert!(args.iter().any(|arg| arg.contains("10.0.0.7")));
        assert!(!args.iter().any(|arg| arg.contains(IP_PLACEHOLDER)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_strategy_name_wins() {
        let resolver = SystemResolver::with_strategies(
            Duration::from_secs(5),
            vec![
                Strategy::new("sh", &["-c", "exit 1"], parse_plain),
                Strategy::new("echo", &["{ip}     nas.home"], parse_getent),
                Strategy::new("echo", &["other.home"], parse_plain),
            ],
        );
        let name = resolver.resolve(Ipv4Addr::new(10, 0, 0, 7)).await;
        assert_eq!(name.as_deref(), Some("nas.home"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_lookup_kills_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 2; touch '{}'", marker.display());

        let resolver = SystemResolver::with_strategies(
            Duration::from_millis(200),
            vec![
                Strategy::new("sh", &["-c", script.as_str()], parse_plain),
                Strategy::new("sh", &["-c", script.as_str()], parse_plain),
            ],
        );

        let started = std::time::Instant::now();
        let name = resolver.resolve(Ipv4Addr::new(1, 2, 3, 4)).await;
        assert_eq!(name, None);
        assert!(started.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists(), "slow resolver tool outlived its timeout");
    }
}
