//! Configuration loading.
//!
//! Values are resolved with this priority:
//! 1. Environment variables (`NETPULSE_BIND`, `NETPULSE_DATA_DIR`, `NETPULSE_OUI_FILE`)
//! 2. Config file (`~/.config/netpulse/config.toml` or an explicit path)
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable for the server listen address
pub const ENV_BIND: &str = "NETPULSE_BIND";

/// Environment variable for the data directory
pub const ENV_DATA_DIR: &str = "NETPULSE_DATA_DIR";

/// Environment variable for the OUI table file
pub const ENV_OUI_FILE: &str = "NETPULSE_OUI_FILE";

const DATABASE_FILE: &str = "netpulse.db";
const RUNS_DIR: &str = "runs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetPulseConfig {
    pub server: ServerSettings,
    pub scan: ScanSettings,
    pub storage: StorageSettings,
    pub vendor: VendorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Sweep and admission tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Per-probe reply timeout
    pub ping_timeout_ms: u64,
    /// Maximum probes in flight
    pub concurrency: usize,
    /// Minimum time between scan starts
    pub min_interval_secs: u64,
    /// Wall-clock limit for sweep, enrichment and persistence
    pub max_duration_secs: u64,
    pub hostname_timeout_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 800,
            concurrency: 128,
            min_interval_secs: 3,
            max_duration_secs: 90,
            hostname_timeout_ms: 2000,
        }
    }
}

impl ScanSettings {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn hostname_timeout(&self) -> Duration {
        Duration::from_millis(self.hostname_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Configured directory, else `<data_local_dir>/netpulse`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .or_else(dirs::data_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("netpulse")
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(DATABASE_FILE)
    }

    /// Per-scan JSON snapshots.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir().join(RUNS_DIR)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorSettings {
    pub oui_file: Option<PathBuf>,
    pub builtin_fallback: bool,
}

impl Default for VendorSettings {
    fn default() -> Self {
        Self {
            oui_file: None,
            builtin_fallback: true,
        }
    }
}

impl NetPulseConfig {
    /// The OUI table to load: the configured file, else `oui.json` in the
    /// data directory, else `oui_sample.csv` next to it.
    pub fn oui_path(&self) -> PathBuf {
        if let Some(path) = &self.vendor.oui_file {
            return path.clone();
        }

        let data_dir = self.storage.data_dir();
        let json = data_dir.join("oui.json");
        if json.exists() {
            json
        } else {
            data_dir.join("oui_sample.csv")
        }
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from config file
    ConfigFile,
    /// At least one environment variable override applied
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::Environment => write!(f, "environment variable"),
        }
    }
}

/// A resolved configuration and how it was obtained.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: NetPulseConfig,
    pub source: ConfigSource,
    /// The config file that was read, if any
    pub path: Option<PathBuf>,
}

/// Get the path to the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("netpulse").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn config_file_path_string() -> String {
    default_config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/netpulse/config.toml".to_string())
}

/// Read and parse one config file. Missing or malformed files are `None`.
fn load_config_file(path: &Path) -> Option<NetPulseConfig> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Apply environment overrides through `lookup`. Returns whether any applied.
pub fn apply_env_overrides(
    config: &mut NetPulseConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> bool {
    let value = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let mut applied = false;

    if let Some(bind) = value(ENV_BIND) {
        tracing::info!("Using bind address from environment variable: {}", bind);
        config.server.bind = bind;
        applied = true;
    }
    if let Some(dir) = value(ENV_DATA_DIR) {
        tracing::info!("Using data directory from environment variable: {}", dir);
        config.storage.data_dir = Some(PathBuf::from(dir));
        applied = true;
    }
    if let Some(file) = value(ENV_OUI_FILE) {
        tracing::info!("Using OUI file from environment variable: {}", file);
        config.vendor.oui_file = Some(PathBuf::from(file));
        applied = true;
    }

    applied
}

/// Resolve configuration from the process environment, `explicit` (or the
/// default config path) and built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> LoadedConfig {
    load_config_with(explicit, |name| std::env::var(name).ok())
}

pub fn load_config_with(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> LoadedConfig {
    let path = explicit.map(Path::to_path_buf).or_else(default_config_path);

    let (mut config, mut source, used_path) = match path
        .as_deref()
        .and_then(|p| load_config_file(p).map(|c| (c, p.to_path_buf())))
    {
        Some((config, p)) => (config, ConfigSource::ConfigFile, Some(p)),
        None => {
            tracing::debug!("Using default configuration");
            (NetPulseConfig::default(), ConfigSource::Default, None)
        }
    };

    if apply_env_overrides(&mut config, lookup) {
        source = ConfigSource::Environment;
    }

    LoadedConfig {
        config,
        source,
        path: used_path,
    }
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# NetPulse Configuration
# Place this file at: ~/.config/netpulse/config.toml

[server]
# Address the HTTP service listens on (env: NETPULSE_BIND)
bind = "127.0.0.1:8000"

[scan]
# Per-probe reply timeout in milliseconds
ping_timeout_ms = 800
# Maximum number of probes in flight
concurrency = 128
# Minimum seconds between scan starts
min_interval_secs = 3
# Wall-clock limit for one scan in seconds
max_duration_secs = 90
hostname_timeout_ms = 2000

[storage]
# Database and scan snapshots (env: NETPULSE_DATA_DIR)
# Default: platform local data directory + /netpulse
# data_dir = "/var/lib/netpulse"

[vendor]
# OUI table, .json object or oui,vendor CSV (env: NETPULSE_OUI_FILE)
# Default: <data_dir>/oui.json, then <data_dir>/oui_sample.csv
# oui_file = "/etc/netpulse/oui.json"
# Use the embedded IEEE registry for prefixes missing from the table
builtin_fallback = true
"#
    .to_string()
}
