//! Scan orchestration.
//!
//! A [`ScanCoordinator`] is built once per process and shared by handle. It
//! owns the admission state (last scan start, execution lock) and drives one
//! scan through detect -> sweep -> neighbor read -> enrichment -> persistence.

use crate::config::NetPulseConfig;
use crate::error::{Result, ScanError};
use crate::scanner::{HostObservation, NetworkScanner, VendorDirectory};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// Scan row as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub scan_id: i64,
    pub subnet: String,
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub host_count: usize,
}

/// One attributed host from this scan, merged with its stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan: ScanMetadata,
    pub devices: Vec<DiscoveredDevice>,
}

/// Progress updates during a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub stage: ScanStage,
    pub message: String,
    pub devices_found: Option<usize>,
    pub elapsed_secs: f64,
}

/// Stages of a scan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Admitting,
    DetectingSubnet,
    Sweeping,
    ReadingNeighbors,
    Enriching,
    Persisting,
    Complete,
    Aborted,
}

/// Callback type for scan progress updates
pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

struct ProgressReporter {
    started: Instant,
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    fn emit(&self, stage: ScanStage, message: &str, devices_found: Option<usize>) {
        tracing::info!("[Scan] {}", message);
        if let Some(callback) = &self.callback {
            callback(ScanProgress {
                stage,
                message: message.to_string(),
                devices_found,
                elapsed_secs: self.started.elapsed().as_secs_f64(),
            });
        }
    }
}

/// Serializes scans and enforces the minimum interval between scan starts.
pub struct ScanCoordinator {
    scanner: NetworkScanner,
    store: Store,
    vendors: Arc<VendorDirectory>,
    runs_dir: PathBuf,
    min_interval: Duration,
    max_duration: Duration,
    execution: Mutex<()>,
    last_started: std::sync::Mutex<Option<Instant>>,
}

impl ScanCoordinator {
    pub fn new(
        scanner: NetworkScanner,
        store: Store,
        vendors: Arc<VendorDirectory>,
        runs_dir: PathBuf,
        min_interval: Duration,
        max_duration: Duration,
    ) -> Self {
        Self {
            scanner,
            store,
            vendors,
            runs_dir,
            min_interval,
            max_duration,
            execution: Mutex::new(()),
            last_started: std::sync::Mutex::new(None),
        }
    }

    /// OS-backed coordinator: opens the database, loads the OUI table.
    pub async fn from_config(config: &NetPulseConfig) -> Result<Self> {
        let store = Store::open(&config.storage.database_path()).await?;

        let oui_path = config.oui_path();
        let vendors = VendorDirectory::load(&oui_path)
            .with_builtin_fallback(config.vendor.builtin_fallback);

        Ok(Self::new(
            NetworkScanner::system(&config.scan),
            store,
            Arc::new(vendors),
            config.storage.runs_dir(),
            config.scan.min_interval(),
            config.scan.max_duration(),
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Whether a scan currently holds the execution lock.
    pub fn is_busy(&self) -> bool {
        self.execution.try_lock().is_err()
    }

    pub async fn run_scan(&self) -> Result<ScanResult> {
        self.run_scan_with_progress(None).await
    }

    /// Run one scan with progress callbacks.
    pub async fn run_scan_with_progress(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> Result<ScanResult> {
        let progress = ProgressReporter {
            started: Instant::now(),
            callback: on_progress,
        };

        progress.emit(ScanStage::Admitting, "Checking scan admission...", None);
        let _guard = match self.admit() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Scan rejected: {}", e);
                return Err(e);
            }
        };

        progress.emit(ScanStage::DetectingSubnet, "Detecting local subnet...", None);
        let subnet = self.scanner.detect_subnet().await;
        let ts_start = Utc::now();
        let scan_id = self.store.create_scan(&subnet.to_string(), ts_start).await?;
        tracing::info!(scan_id, subnet = %subnet, "Scan started");

        let outcome = tokio::time::timeout(
            self.max_duration,
            self.execute(scan_id, subnet, &progress),
        )
        .await;

        let devices = match outcome {
            Ok(Ok(devices)) => devices,
            Ok(Err(e)) => {
                tracing::error!(scan_id, "Scan failed: {}", e);
                self.abort(scan_id, &progress, &format!("Scan failed: {}", e)).await;
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(scan_id, limit_secs = self.max_duration.as_secs(), "Scan timed out");
                let message = format!("Scan timed out after {}s", self.max_duration.as_secs());
                self.abort(scan_id, &progress, &message).await;
                return Err(ScanError::Timeout {
                    scan_id,
                    limit: self.max_duration,
                });
            }
        };

        let result = ScanResult {
            scan: ScanMetadata {
                scan_id,
                subnet: subnet.to_string(),
                ts_start,
                ts_end: devices.ts_end,
                host_count: devices.list.len(),
            },
            devices: devices.list,
        };

        if let Err(e) = self.write_snapshot(&result).await {
            tracing::warn!(scan_id, "Failed to write scan snapshot: {}", e);
        }

        progress.emit(
            ScanStage::Complete,
            &format!(
                "Scan complete: {} devices found in {:.1}s",
                result.scan.host_count,
                progress.started.elapsed().as_secs_f64()
            ),
            Some(result.scan.host_count),
        );
        tracing::info!(
            scan_id,
            subnet = %result.scan.subnet,
            host_count = result.scan.host_count,
            "Scan completed"
        );

        Ok(result)
    }

    /// Leaves the row `aborted` with no end time.
    async fn abort(&self, scan_id: i64, progress: &ProgressReporter, message: &str) {
        if let Err(e) = self.store.abort_scan(scan_id).await {
            tracing::error!(scan_id, "Failed to mark scan as aborted: {}", e);
        }
        progress.emit(ScanStage::Aborted, message, None);
    }

    /// Rate limit first, then mutual exclusion. Neither check waits.
    fn admit(&self) -> Result<MutexGuard<'_, ()>> {
        let mut last_started = self
            .last_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = *last_started {
            let since = previous.elapsed();
            if since < self.min_interval {
                return Err(ScanError::RateLimited {
                    retry_after: self.min_interval - since,
                });
            }
        }

        let guard = self.execution.try_lock().map_err(|_| ScanError::Busy)?;
        *last_started = Some(Instant::now());
        Ok(guard)
    }

    /// Everything covered by the wall-clock limit.
    async fn execute(
        &self,
        scan_id: i64,
        subnet: ipnetwork::Ipv4Network,
        progress: &ProgressReporter,
    ) -> Result<PersistedDevices> {
        progress.emit(
            ScanStage::Sweeping,
            &format!("Sweeping {}...", subnet),
            None,
        );
        let alive = self.scanner.sweep(subnet).await;
        progress.emit(
            ScanStage::Sweeping,
            &format!("{} hosts responding", alive.len()),
            Some(alive.len()),
        );

        progress.emit(ScanStage::ReadingNeighbors, "Reading neighbor table...", None);
        let neighbors = self.scanner.read_neighbors().await;

        progress.emit(
            ScanStage::Enriching,
            &format!("Resolving hostnames for {} hosts...", alive.len()),
            Some(alive.len()),
        );
        let observations = self.scanner.observe(alive, &neighbors).await;

        progress.emit(ScanStage::Persisting, "Recording devices...", None);
        let mut list = Vec::with_capacity(observations.len());
        for observation in observations {
            if let Some(device) = self.record(scan_id, observation).await? {
                list.push(device);
            }
        }

        let ts_end = Utc::now();
        self.store.complete_scan(scan_id, ts_end, list.len()).await?;

        Ok(PersistedDevices { list, ts_end })
    }

    /// Upsert the device and append the observation. Hosts without a
    /// hardware address have no identity and are skipped.
    async fn record(
        &self,
        scan_id: i64,
        observation: HostObservation,
    ) -> Result<Option<DiscoveredDevice>> {
        let HostObservation { ip, mac, hostname } = observation;
        let Some(mac) = mac else {
            tracing::debug!("{} responded but has no hardware address, skipping", ip);
            return Ok(None);
        };

        let vendor = self.vendors.lookup(&mac);
        let now = Utc::now();
        let upsert = self.store.upsert_device(&mac, vendor.as_deref(), now).await?;
        self.store
            .insert_observation(&mac, ip, hostname.as_deref(), now, scan_id)
            .await?;

        Ok(Some(DiscoveredDevice {
            ip,
            mac,
            hostname,
            vendor,
            first_seen: upsert.first_seen,
            last_seen: now.max(upsert.first_seen),
            is_new: upsert.is_new,
        }))
    }

    /// `runs/scan_<id>.json`; a debugging artifact, not authoritative.
    async fn write_snapshot(&self, result: &ScanResult) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.runs_dir).await?;
        let path = self.runs_dir.join(format!("scan_{}.json", result.scan.scan_id));
        let content = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, content).await?;
        tracing::debug!("Wrote scan snapshot {:?}", path);
        Ok(path)
    }
}

struct PersistedDevices {
    list: Vec<DiscoveredDevice>,
    ts_end: DateTime<Utc>,
}
