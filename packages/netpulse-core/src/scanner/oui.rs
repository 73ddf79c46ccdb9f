//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Vendors come from an OUI table loaded once at start-up. Two file formats
//! are accepted:
//! - JSON object of `oui -> vendor` (keys like `001A2B`, `00:1A:2B`,
//!   `00-1A-2B` or `001A2B/24`)
//! - CSV lines of `oui,vendor name`
//!
//! Entries missing from the file can optionally fall back to the IEEE
//! registry embedded by the `oui-data` crate.

use std::collections::HashMap;
use std::path::Path;

/// Read-only OUI prefix to vendor name table.
#[derive(Debug, Clone, Default)]
pub struct VendorDirectory {
    prefixes: HashMap<String, String>,
    builtin_fallback: bool,
}

impl VendorDirectory {
    /// A directory with no entries and no fallback.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a `.json` or CSV file. A missing or unreadable file yields
    /// an empty directory.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("OUI file {:?} unavailable: {}", path, e);
                return Self::empty();
            }
        };

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let directory = if is_json {
            Self::from_json_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse OUI file {:?}: {}", path, e);
                Self::empty()
            })
        } else {
            Self::from_csv_str(&content)
        };

        tracing::info!("Loaded {} OUI prefixes from {:?}", directory.len(), path);
        directory
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        let payload: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;

        let prefixes = payload
            .into_iter()
            .filter_map(|(raw_key, raw_value)| {
                let vendor = match raw_value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                };
                let key = oui_key(&raw_key)?;
                (!vendor.is_empty()).then_some((key, vendor))
            })
            .collect();

        Ok(Self {
            prefixes,
            builtin_fallback: false,
        })
    }

    pub fn from_csv_str(content: &str) -> Self {
        let prefixes = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let (prefix, vendor) = line.split_once(',')?;
                let vendor = vendor.trim();
                let key = oui_key(prefix)?;
                (!vendor.is_empty()).then(|| (key, vendor.to_string()))
            })
            .collect();

        Self {
            prefixes,
            builtin_fallback: false,
        }
    }

    /// Consult the embedded IEEE registry when the table has no entry.
    pub fn with_builtin_fallback(mut self, enabled: bool) -> Self {
        self.builtin_fallback = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Vendor for a MAC address in any common format
    /// (`00:1A:2B:3C:4D:5E`, `00-1a-2b-3c-4d-5e`, `001a.2b3c.4d5e`).
    pub fn lookup(&self, mac: &str) -> Option<String> {
        let key = oui_key(mac)?;

        if let Some(vendor) = self.prefixes.get(&key) {
            return Some(vendor.clone());
        }

        if self.builtin_fallback {
            return lookup_builtin(mac);
        }

        tracing::debug!("OUI lookup for {}: not found", mac);
        None
    }
}

/// First six hex digits, uppercased, separators stripped.
fn oui_key(raw: &str) -> Option<String> {
    let cleaned: String = raw.trim().replace([':', '-', '.'], "").to_uppercase();
    let prefix = cleaned.get(..6)?;

    prefix
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| prefix.to_string())
}

fn lookup_builtin(mac: &str) -> Option<String> {
    let normalized = normalize_mac(mac)?;

    match oui_data::lookup(&normalized) {
        Some(record) => {
            let vendor_name = record.organization().to_string();
            tracing::debug!("OUI lookup for {}: {} (embedded registry)", mac, vendor_name);
            Some(vendor_name)
        }
        None => {
            tracing::debug!("OUI lookup for {}: not found in embedded registry", mac);
            None
        }
    }
}

/// Normalize a MAC address to the format XX:XX:XX:XX:XX:XX
fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() < 6 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let padded = if cleaned.len() < 12 {
        format!("{:0<12}", cleaned)
    } else {
        cleaned[..12].to_string()
    };

    Some(format!(
        "{}:{}:{}:{}:{}:{}",
        &padded[0..2],
        &padded[2..4],
        &padded[4..6],
        &padded[6..8],
        &padded[8..10],
        &padded[10..12]
    ))
}
