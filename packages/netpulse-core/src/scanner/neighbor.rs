//! Neighbor (ARP) table reading using system commands.
//!
//! The parser understands three layouts and does not need to know which tool
//! produced the text:
//! - `arp -a` on Linux/macOS: `? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on wlan0`
//! - `arp -a` on Windows: `192.168.1.1          aa-bb-cc-dd-ee-ff     dynamic`
//! - `ip neigh`: `192.168.1.1 dev wlan0 lladdr aa:bb:cc:dd:ee:ff REACHABLE`

use super::hidden_command;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::LazyLock;

/// IPv4 address to canonical `AA:BB:CC:DD:EE:FF` hardware address.
pub type NeighborTable = HashMap<Ipv4Addr, String>;

const MAC_PATTERN: &str = r"(?:[0-9a-f]{2}[:-]){5}[0-9a-f]{2}";

// Merge order matters only when two layouts disagree on the same IP; the
// later pattern wins.
static LAYOUTS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?i)\((?P<ip>\d+\.\d+\.\d+\.\d+)\)\s+at\s+(?P<mac>{MAC_PATTERN})"),
        format!(r"(?i)(?P<ip>\d+\.\d+\.\d+\.\d+)\s+(?P<mac>{MAC_PATTERN})"),
        format!(r"(?i)(?P<ip>\d+\.\d+\.\d+\.\d+).*?lladdr\s+(?P<mac>{MAC_PATTERN})"),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("neighbor layout pattern must compile"))
    .collect()
});

/// Parse raw neighbor-table output into an address mapping.
///
/// Never fails: text with no recognizable entries yields an empty table.
pub fn parse_neighbor_output(text: &str) -> NeighborTable {
    let mut table = NeighborTable::new();

    for layout in LAYOUTS.iter() {
        for caps in layout.captures_iter(text) {
            let Ok(ip) = caps["ip"].parse::<Ipv4Addr>() else {
                continue;
            };
            table.insert(ip, canonical_mac(&caps["mac"]));
        }
    }

    table
}

/// Normalize separators to `:` and hex digits to uppercase.
pub fn canonical_mac(mac: &str) -> String {
    mac.replace('-', ":").to_ascii_uppercase()
}

/// Source of the current neighbor table.
#[async_trait]
pub trait NeighborSource: Send + Sync {
    async fn read_table(&self) -> NeighborTable;
}

/// One neighbor-table command candidate.
#[derive(Debug, Clone)]
pub struct NeighborCommand {
    program: String,
    args: Vec<String>,
}

impl NeighborCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Run the command and parse its stdout. `None` when the program could
    /// not be launched at all.
    async fn read(&self) -> Option<NeighborTable> {
        let output = hidden_command(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) => {
                let text = String::from_utf8_lossy(&output.stdout);
                Some(parse_neighbor_output(&text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("{} not available, skipping", self.program);
                None
            }
            Err(e) => {
                tracing::warn!("Failed to run {}: {}", self.program, e);
                None
            }
        }
    }
}

/// Reads the OS neighbor table, trying each command in order until one
/// produces a non-empty table.
#[derive(Debug, Clone)]
pub struct SystemNeighborTable {
    commands: Vec<NeighborCommand>,
}

impl SystemNeighborTable {
    /// `arp -a` first, `ip neigh` when arp is missing or reports nothing.
    pub fn new() -> Self {
        Self::with_commands(vec![
            NeighborCommand::new("arp", &["-a"]),
            NeighborCommand::new("ip", &["neigh"]),
        ])
    }

    pub fn with_commands(commands: Vec<NeighborCommand>) -> Self {
        Self { commands }
    }
}

impl Default for SystemNeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NeighborSource for SystemNeighborTable {
    async fn read_table(&self) -> NeighborTable {
        for command in &self.commands {
            match command.read().await {
                Some(table) if !table.is_empty() => {
                    tracing::debug!(
                        "Neighbor table from {}: {} entries",
                        command.program,
                        table.len()
                    );
                    return table;
                }
                Some(_) => tracing::debug!("{} returned no neighbor entries", command.program),
                None => {}
            }
        }

        tracing::warn!("No neighbor table available; hardware addresses will be missing");
        NeighborTable::new()
    }
}
