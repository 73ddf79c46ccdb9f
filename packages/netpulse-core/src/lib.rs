//! NetPulse Core Library
//!
//! This crate provides the LAN discovery engine behind the NetPulse server
//! and CLI:
//! - Network scanning (subnet detection, ping sweep, neighbor table, hostnames)
//! - Vendor lookup by MAC OUI prefix
//! - Device, scan and observation history in SQLite
//! - Scan coordination (rate limit, mutual exclusion, wall-clock limit)
//!
//! # Example
//!
//! ```no_run
//! use netpulse_core::{config, ScanCoordinator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netpulse_core::ScanError> {
//!     let loaded = config::load_config(None);
//!     let coordinator = ScanCoordinator::from_config(&loaded.config).await?;
//!
//!     let result = coordinator.run_scan().await?;
//!     println!("Found {} devices on {}", result.devices.len(), result.scan.subnet);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod scanner;
pub mod store;

// Re-export commonly used types
pub use config::{ConfigSource, LoadedConfig, NetPulseConfig};
pub use coordinator::{
    DiscoveredDevice, ProgressCallback, ScanCoordinator, ScanMetadata, ScanProgress, ScanResult,
    ScanStage,
};
pub use error::ScanError;
pub use scanner::{HostObservation, NetworkScanner, VendorDirectory};
pub use store::{DeviceRecord, ObservationRecord, ScanRecord, ScanStatus, Store};
