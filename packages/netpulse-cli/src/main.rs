//! NetPulse CLI - scan the local network and inspect device history
//!
//! This binary can:
//! - Run a scan in-process against the local history database
//! - List known devices, their address history and past scans
//! - Set device nicknames
//! - Drive a running netpulse-server over HTTP

mod client;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use netpulse_core::config::{self, LoadedConfig};
use netpulse_core::scanner::neighbor::canonical_mac;
use netpulse_core::{ProgressCallback, ScanCoordinator, ScanProgress, ScanResult, Store};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "netpulse")]
#[command(author = "NetPulse Team")]
#[command(version)]
#[command(about = "Discover devices on the local network and track them over time")]
#[command(long_about = "
NetPulse sweeps the local /24, reads the neighbor table for hardware
addresses and records every device it sees, so new arrivals stand out.

Quick start:
  1. Run a scan:          netpulse scan
  2. List known devices:  netpulse devices
  3. Name a device:       netpulse nickname AA:BB:CC:DD:EE:FF \"Printer\"
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file (default: ~/.config/netpulse/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a network scan and record the results
    Scan,

    /// List known devices
    Devices,

    /// Show where a device has been seen
    History {
        /// Hardware address, any common separator
        mac: String,
    },

    /// Show recent scans
    Scans {
        /// Number of scans to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Set a device nickname, or clear it when no name is given
    Nickname {
        mac: String,
        name: Option<String>,
    },

    /// Talk to a running netpulse-server
    Remote {
        #[command(subcommand)]
        action: RemoteAction,

        /// Server base URL
        #[arg(short, long, global = true, default_value = client::DEFAULT_SERVER_URL)]
        url: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[derive(Subcommand, Clone, Copy)]
pub enum RemoteAction {
    /// Ask the server to run a scan
    Scan,
    /// Check that the server is up
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("netpulse={},netpulse_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let loaded = config::load_config(cli.config.as_deref());

    match &cli.command {
        Commands::Scan => cmd_scan(&cli, &loaded).await,
        Commands::Devices => cmd_devices(&cli, &loaded).await,
        Commands::History { mac } => cmd_history(&cli, &loaded, mac).await,
        Commands::Scans { limit } => cmd_scans(&cli, &loaded, *limit).await,
        Commands::Nickname { mac, name } => {
            cmd_nickname(&cli, &loaded, mac, name.as_deref()).await
        }
        Commands::Remote { action, url } => cmd_remote(&cli, *action, url).await,
        Commands::Config => cmd_config(&cli, &loaded),
    }
}

async fn open_store(loaded: &LoadedConfig) -> Result<Store> {
    let path = loaded.config.storage.database_path();
    Store::open(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_scan(cli: &Cli, loaded: &LoadedConfig) -> Result<()> {
    let coordinator = ScanCoordinator::from_config(&loaded.config)
        .await
        .context("Failed to initialise scanner")?;

    // Create progress callback for text mode
    let progress_callback: Option<ProgressCallback> = match cli.format {
        OutputFormat::Text => {
            println!("Scanning network...");
            Some(Box::new(|progress: ScanProgress| {
                println!("  [{:>5.1}s] {}", progress.elapsed_secs, progress.message);
            }))
        }
        OutputFormat::Json => None,
    };

    let result = coordinator.run_scan_with_progress(progress_callback).await;
    coordinator.store().close().await;
    let result = result?;

    match cli.format {
        OutputFormat::Text => print_scan_result(&result),
        OutputFormat::Json => print_json(&result)?,
    }

    Ok(())
}

fn print_scan_result(result: &ScanResult) {
    println!();
    println!(
        "Scan {} of {}: {} devices",
        result.scan.scan_id, result.scan.subnet, result.scan.host_count
    );
    println!();
    for device in &result.devices {
        let marker = if device.is_new { "NEW" } else { "" };
        println!(
            "  {:15} {:17} {:3}  {}  {}",
            device.ip.to_string(),
            device.mac,
            marker,
            device.hostname.as_deref().unwrap_or("-"),
            device.vendor.as_deref().unwrap_or("")
        );
    }
}

async fn cmd_devices(cli: &Cli, loaded: &LoadedConfig) -> Result<()> {
    let store = open_store(loaded).await?;
    let devices = store.list_devices().await;
    store.close().await;
    let devices = devices?;

    match cli.format {
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No devices recorded yet. Run 'netpulse scan' first.");
                return Ok(());
            }
            println!("{} known devices:", devices.len());
            println!();
            for device in &devices {
                println!(
                    "  {:17}  {:20}  {:24}  first {}  last {}",
                    device.mac,
                    device.nickname.as_deref().unwrap_or("-"),
                    device.vendor.as_deref().unwrap_or("-"),
                    local_time(&device.first_seen),
                    local_time(&device.last_seen)
                );
            }
        }
        OutputFormat::Json => print_json(&devices)?,
    }

    Ok(())
}

async fn cmd_history(cli: &Cli, loaded: &LoadedConfig, mac: &str) -> Result<()> {
    let mac = canonical_mac(mac.trim());
    let store = open_store(loaded).await?;
    let device = store.get_device(&mac).await;
    let history = store.device_history(&mac).await;
    store.close().await;
    let (device, history) = (device?, history?);

    match cli.format {
        OutputFormat::Text => {
            let Some(device) = device else {
                println!("Unknown device {}", mac);
                return Ok(());
            };
            println!(
                "{} {}",
                device.mac,
                device
                    .nickname
                    .as_deref()
                    .map(|n| format!("({})", n))
                    .unwrap_or_default()
            );
            println!("Vendor:     {}", device.vendor.as_deref().unwrap_or("-"));
            println!("First seen: {}", local_time(&device.first_seen));
            println!("Last seen:  {}", local_time(&device.last_seen));
            println!();
            for observation in &history {
                println!(
                    "  {}  {:15}  {}  (scan {})",
                    local_time(&observation.ts),
                    observation.ip,
                    observation.hostname.as_deref().unwrap_or("-"),
                    observation.scan_id
                );
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "device": device,
            "observations": history,
        }))?,
    }

    Ok(())
}

async fn cmd_scans(cli: &Cli, loaded: &LoadedConfig, limit: u32) -> Result<()> {
    let store = open_store(loaded).await?;
    let scans = store.recent_scans(limit).await;
    store.close().await;
    let scans = scans?;

    match cli.format {
        OutputFormat::Text => {
            if scans.is_empty() {
                println!("No scans recorded yet.");
                return Ok(());
            }
            for scan in &scans {
                let ended = scan
                    .ts_end
                    .as_ref()
                    .map(local_time)
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  #{:<5} {:18} {:9}  {}  ->  {}  {} hosts",
                    scan.id,
                    scan.subnet,
                    scan.status.to_string(),
                    local_time(&scan.ts_start),
                    ended,
                    scan.host_count
                );
            }
        }
        OutputFormat::Json => print_json(&scans)?,
    }

    Ok(())
}

async fn cmd_nickname(
    cli: &Cli,
    loaded: &LoadedConfig,
    mac: &str,
    name: Option<&str>,
) -> Result<()> {
    let mac = canonical_mac(mac.trim());
    let name = name.map(str::trim).filter(|n| !n.is_empty());

    let store = open_store(loaded).await?;
    let updated = store.set_nickname(&mac, name).await;
    store.close().await;
    let updated = updated?;

    match cli.format {
        OutputFormat::Text => match (updated, name) {
            (false, _) => println!("Unknown device {}", mac),
            (true, Some(name)) => println!("{} is now '{}'", mac, name),
            (true, None) => println!("Cleared nickname of {}", mac),
        },
        OutputFormat::Json => print_json(&serde_json::json!({
            "mac": mac,
            "nickname": name,
            "updated": updated,
        }))?,
    }

    if !updated {
        anyhow::bail!("No device with hardware address {}", mac);
    }
    Ok(())
}

async fn cmd_remote(cli: &Cli, action: RemoteAction, url: &str) -> Result<()> {
    let client = client::ServerClient::new(url)?;

    match action {
        RemoteAction::Health => {
            let health = client.health().await?;
            match cli.format {
                OutputFormat::Text => println!(
                    "{} is {} (version {})",
                    health["service"].as_str().unwrap_or("server"),
                    health["status"].as_str().unwrap_or("unknown"),
                    health["version"].as_str().unwrap_or("-")
                ),
                OutputFormat::Json => print_json(&health)?,
            }
        }
        RemoteAction::Scan => {
            if let OutputFormat::Text = cli.format {
                println!("Requesting scan from {}...", url);
            }
            let result = client.scan().await?;
            match cli.format {
                OutputFormat::Text => print_scan_result(&result),
                OutputFormat::Json => print_json(&result)?,
            }
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, loaded: &LoadedConfig) -> Result<()> {
    let settings = &loaded.config;
    let config_path = loaded
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(config::config_file_path_string);

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:   {} (from {})", config_path, loaded.source);
            println!("Listen:        {}", settings.server.bind);
            println!("Database:      {}", settings.storage.database_path().display());
            println!("Snapshots:     {}", settings.storage.runs_dir().display());
            println!("OUI table:     {}", settings.oui_path().display());
            println!(
                "Scan:          concurrency {}, ping {}ms, interval {}s, limit {}s",
                settings.scan.concurrency,
                settings.scan.ping_timeout_ms,
                settings.scan.min_interval_secs,
                settings.scan.max_duration_secs
            );
            println!();
            println!("Environment variables:");
            println!("  {} - Override listen address", config::ENV_BIND);
            println!("  {} - Override data directory", config::ENV_DATA_DIR);
            println!("  {} - Override OUI table file", config::ENV_OUI_FILE);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "config_file": config_path,
            "source": loaded.source.to_string(),
            "database": settings.storage.database_path(),
            "runs_dir": settings.storage.runs_dir(),
            "oui_file": settings.oui_path(),
            "settings": settings,
        }))?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_nickname_clear() {
        let cli = Cli::try_parse_from(["netpulse", "nickname", "aa-bb-cc-dd-ee-ff"]).unwrap();
        match cli.command {
            Commands::Nickname { mac, name } => {
                assert_eq!(canonical_mac(&mac), "AA:BB:CC:DD:EE:FF");
                assert_eq!(name, None);
            }
            _ => panic!("expected nickname command"),
        }
    }

    #[test]
    fn test_parse_remote_with_url_and_json() {
        let cli = Cli::try_parse_from([
            "netpulse",
            "--format",
            "json",
            "remote",
            "scan",
            "--url",
            "http://10.0.0.2:8000",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Remote { action, url } => {
                assert!(matches!(action, RemoteAction::Scan));
                assert_eq!(url, "http://10.0.0.2:8000");
            }
            _ => panic!("expected remote command"),
        }
    }

    #[test]
    fn test_scans_default_limit() {
        let cli = Cli::try_parse_from(["netpulse", "scans"]).unwrap();
        assert!(matches!(cli.command, Commands::Scans { limit: 10 }));
    }
}
