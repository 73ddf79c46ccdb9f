//! Device and scan history in SQLite.
//!
//! Three tables:
//! - `devices`: one row per hardware address, first/last seen
//! - `scans`: one row per scan; `ts_end` stays NULL unless it completed
//! - `observations`: append-only sightings of a device at an address
//!
//! Every write is its own short transaction so an interrupted scan leaves a
//! consistent but incomplete history.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        mac TEXT PRIMARY KEY,
        vendor TEXT,
        nickname TEXT,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scans (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts_start TEXT NOT NULL,
        ts_end TEXT,
        subnet TEXT NOT NULL,
        host_count INTEGER DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'running'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mac TEXT NOT NULL,
        ip TEXT NOT NULL,
        hostname TEXT,
        ts TEXT NOT NULL,
        scan_id INTEGER NOT NULL,
        FOREIGN KEY(mac) REFERENCES devices(mac),
        FOREIGN KEY(scan_id) REFERENCES scans(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_observations_mac ON observations(mac, ts)",
];

/// Lifecycle of a scan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Running,
    Completed,
    /// Hit the wall-clock limit; `ts_end` is never written.
    Aborted,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Aborted => "aborted",
        }
    }

    fn from_db(value: &str) -> Self {
        match value {
            "completed" => ScanStatus::Completed,
            "aborted" => ScanStatus::Aborted,
            _ => ScanStatus::Running,
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub mac: String,
    pub vendor: Option<String>,
    pub nickname: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub ts_start: DateTime<Utc>,
    pub ts_end: Option<DateTime<Utc>>,
    pub subnet: String,
    pub host_count: i64,
    pub status: ScanStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: i64,
    pub mac: String,
    pub ip: String,
    pub hostname: Option<String>,
    pub ts: DateTime<Utc>,
    pub scan_id: i64,
}

/// Outcome of [`Store::upsert_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceUpsert {
    pub first_seen: DateTime<Utc>,
    pub is_new: bool,
}

/// Handle to the history database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file and its parent directory.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!("Opened device history at {:?}", path);
        Ok(store)
    }

    /// Private database that lives as long as this handle. A single
    /// connection is kept open; each new connection would see an empty
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// New scan row with no end timestamp. Ids increase monotonically.
    pub async fn create_scan(&self, subnet: &str, ts_start: DateTime<Utc>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO scans (ts_start, subnet) VALUES (?, ?)")
            .bind(to_db(ts_start))
            .bind(subnet)
            .execute(&self.pool)
            .await?;

        let scan_id = result.last_insert_rowid();
        tracing::debug!(scan_id, subnet, "Scan record created");
        Ok(scan_id)
    }

    pub async fn complete_scan(
        &self,
        scan_id: i64,
        ts_end: DateTime<Utc>,
        host_count: usize,
    ) -> Result<()> {
        sqlx::query("UPDATE scans SET ts_end = ?, host_count = ?, status = ? WHERE id = ?")
            .bind(to_db(ts_end))
            .bind(host_count as i64)
            .bind(ScanStatus::Completed.as_str())
            .bind(scan_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(scan_id, host_count, "Scan record completed");
        Ok(())
    }

    /// Mark a scan that ran out of time. `ts_end` stays NULL.
    pub async fn abort_scan(&self, scan_id: i64) -> Result<()> {
        sqlx::query("UPDATE scans SET status = ? WHERE id = ?")
            .bind(ScanStatus::Aborted.as_str())
            .bind(scan_id)
            .execute(&self.pool)
            .await?;

        tracing::debug!(scan_id, "Scan record aborted");
        Ok(())
    }

    /// Insert a new device or refresh an existing one.
    ///
    /// `first_seen` is fixed at creation. The vendor is only replaced by a
    /// non-null value and `last_seen` never drops below `first_seen`.
    pub async fn upsert_device(
        &self,
        mac: &str,
        vendor: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeviceUpsert> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT first_seen FROM devices WHERE mac = ?")
                .bind(mac)
                .fetch_optional(&mut *tx)
                .await?;

        let upsert = match existing {
            Some(first_seen) => {
                let first_seen = from_db(&first_seen)?;
                sqlx::query(
                    "UPDATE devices SET vendor = COALESCE(?, vendor), last_seen = ? WHERE mac = ?",
                )
                .bind(vendor)
                .bind(to_db(now.max(first_seen)))
                .bind(mac)
                .execute(&mut *tx)
                .await?;

                DeviceUpsert {
                    first_seen,
                    is_new: false,
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO devices (mac, vendor, first_seen, last_seen) VALUES (?, ?, ?, ?)",
                )
                .bind(mac)
                .bind(vendor)
                .bind(to_db(now))
                .bind(to_db(now))
                .execute(&mut *tx)
                .await?;

                DeviceUpsert {
                    first_seen: now,
                    is_new: true,
                }
            }
        };

        tx.commit().await?;
        Ok(upsert)
    }

    pub async fn insert_observation(
        &self,
        mac: &str,
        ip: Ipv4Addr,
        hostname: Option<&str>,
        ts: DateTime<Utc>,
        scan_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO observations (mac, ip, hostname, ts, scan_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(mac)
        .bind(ip.to_string())
        .bind(hostname)
        .bind(to_db(ts))
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All known devices, most recently seen first.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        let rows = sqlx::query(
            "SELECT mac, vendor, nickname, first_seen, last_seen FROM devices \
             ORDER BY last_seen DESC, mac",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    pub async fn get_device(&self, mac: &str) -> Result<Option<DeviceRecord>> {
        let row = sqlx::query(
            "SELECT mac, vendor, nickname, first_seen, last_seen FROM devices WHERE mac = ?",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    /// Observations of one device, newest first.
    pub async fn device_history(&self, mac: &str) -> Result<Vec<ObservationRecord>> {
        let rows = sqlx::query(
            "SELECT id, mac, ip, hostname, ts, scan_id FROM observations \
             WHERE mac = ? ORDER BY ts DESC, id DESC",
        )
        .bind(mac)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(observation_from_row).collect()
    }

    pub async fn recent_scans(&self, limit: u32) -> Result<Vec<ScanRecord>> {
        let rows = sqlx::query(
            "SELECT id, ts_start, ts_end, subnet, host_count, status FROM scans \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(scan_from_row).collect()
    }

    pub async fn get_scan(&self, scan_id: i64) -> Result<Option<ScanRecord>> {
        let row = sqlx::query(
            "SELECT id, ts_start, ts_end, subnet, host_count, status FROM scans WHERE id = ?",
        )
        .bind(scan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(scan_from_row).transpose()
    }

    /// Set or clear a nickname. `false` when the device is unknown.
    pub async fn set_nickname(&self, mac: &str, nickname: Option<&str>) -> Result<bool> {
        let result = sqlx::query("UPDATE devices SET nickname = ? WHERE mac = ?")
            .bind(nickname)
            .bind(mac)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Fixed-width UTC text so that string order matches time order.
fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn from_db(value: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn device_from_row(row: &SqliteRow) -> Result<DeviceRecord> {
    Ok(DeviceRecord {
        mac: row.try_get("mac")?,
        vendor: row.try_get("vendor")?,
        nickname: row.try_get("nickname")?,
        first_seen: from_db(row.try_get("first_seen")?)?,
        last_seen: from_db(row.try_get("last_seen")?)?,
    })
}

fn scan_from_row(row: &SqliteRow) -> Result<ScanRecord> {
    let ts_end: Option<&str> = row.try_get("ts_end")?;
    Ok(ScanRecord {
        id: row.try_get("id")?,
        ts_start: from_db(row.try_get("ts_start")?)?,
        ts_end: ts_end.map(from_db).transpose()?,
        subnet: row.try_get("subnet")?,
        host_count: row.try_get::<Option<i64>, _>("host_count")?.unwrap_or(0),
        status: ScanStatus::from_db(row.try_get("status")?),
    })
}

fn observation_from_row(row: &SqliteRow) -> Result<ObservationRecord> {
    Ok(ObservationRecord {
        id: row.try_get("id")?,
        mac: row.try_get("mac")?,
        ip: row.try_get("ip")?,
        hostname: row.try_get("hostname")?,
        ts: from_db(row.try_get("ts")?)?,
        scan_id: row.try_get("scan_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    const MAC: &str = "AA:BB:CC:DD:EE:01";

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_first_seen() {
        let store = Store::in_memory().await.unwrap();

        let first = store.upsert_device(MAC, None, t(0)).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.first_seen, t(0));

        let second = store.upsert_device(MAC, None, t(60)).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.first_seen, t(0));

        let device = store.get_device(MAC).await.unwrap().unwrap();
        assert_eq!(device.first_seen, t(0));
        assert_eq!(device.last_seen, t(60));
    }

    #[tokio::test]
    async fn test_vendor_never_overwritten_with_null() {
        let store = Store::in_memory().await.unwrap();

        store.upsert_device(MAC, Some("Acme"), t(0)).await.unwrap();
        store.upsert_device(MAC, None, t(1)).await.unwrap();
        assert_eq!(
            store.get_device(MAC).await.unwrap().unwrap().vendor.as_deref(),
            Some("Acme")
        );

        store.upsert_device(MAC, Some("Acme Networks"), t(2)).await.unwrap();
        assert_eq!(
            store.get_device(MAC).await.unwrap().unwrap().vendor.as_deref(),
            Some("Acme Networks")
        );
    }

    #[tokio::test]
    async fn test_last_seen_never_before_first_seen() {
        let store = Store::in_memory().await.unwrap();

        store.upsert_device(MAC, None, t(100)).await.unwrap();
        store.upsert_device(MAC, None, t(50)).await.unwrap();

        let device = store.get_device(MAC).await.unwrap().unwrap();
        assert_eq!(device.first_seen, t(100));
        assert!(device.first_seen <= device.last_seen);
    }

    #[tokio::test]
    async fn test_scan_lifecycle() {
        let store = Store::in_memory().await.unwrap();

        let first = store.create_scan("10.0.0.0/24", t(0)).await.unwrap();
        let second = store.create_scan("10.0.0.0/24", t(10)).await.unwrap();
        assert!(second > first);

        let open = store.get_scan(first).await.unwrap().unwrap();
        assert_eq!(open.status, ScanStatus::Running);
        assert_eq!(open.ts_end, None);
        assert_eq!(open.host_count, 0);

        store.complete_scan(first, t(5), 3).await.unwrap();
        let done = store.get_scan(first).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert_eq!(done.ts_end, Some(t(5)));
        assert_eq!(done.host_count, 3);

        store.abort_scan(second).await.unwrap();
        let aborted = store.get_scan(second).await.unwrap().unwrap();
        assert_eq!(aborted.status, ScanStatus::Aborted);
        assert_eq!(aborted.ts_end, None);

        let recent = store.recent_scans(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second);
        assert!(store.get_scan(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_observations_are_appended_newest_first() {
        let store = Store::in_memory().await.unwrap();
        let scan_a = store.create_scan("192.168.1.0/24", t(0)).await.unwrap();
        let scan_b = store.create_scan("192.168.1.0/24", t(100)).await.unwrap();

        store.upsert_device(MAC, None, t(1)).await.unwrap();
        store
            .insert_observation(MAC, Ipv4Addr::new(192, 168, 1, 10), Some("laptop"), t(1), scan_a)
            .await
            .unwrap();
        store.upsert_device(MAC, None, t(101)).await.unwrap();
        store
            .insert_observation(MAC, Ipv4Addr::new(192, 168, 1, 44), None, t(101), scan_b)
            .await
            .unwrap();

        let history = store.device_history(MAC).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ip, "192.168.1.44");
        assert_eq!(history[0].scan_id, scan_b);
        assert_eq!(history[0].hostname, None);
        assert_eq!(history[1].ip, "192.168.1.10");
        assert_eq!(history[1].hostname.as_deref(), Some("laptop"));

        assert!(store.device_history("00:00:00:00:00:00").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_devices_most_recent_first() {
        let store = Store::in_memory().await.unwrap();
        store.upsert_device("AA:00:00:00:00:01", None, t(0)).await.unwrap();
        store.upsert_device("AA:00:00:00:00:02", None, t(30)).await.unwrap();
        store.upsert_device("AA:00:00:00:00:03", None, t(10)).await.unwrap();

        let macs: Vec<String> = store
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.mac)
            .collect();
        assert_eq!(
            macs,
            vec!["AA:00:00:00:00:02", "AA:00:00:00:00:03", "AA:00:00:00:00:01"]
        );
    }

    #[tokio::test]
    async fn test_nickname_set_and_clear() {
        let store = Store::in_memory().await.unwrap();
        store.upsert_device(MAC, None, t(0)).await.unwrap();

        assert!(store.set_nickname(MAC, Some("Living room TV")).await.unwrap());
        assert_eq!(
            store.get_device(MAC).await.unwrap().unwrap().nickname.as_deref(),
            Some("Living room TV")
        );

        assert!(store.set_nickname(MAC, None).await.unwrap());
        assert_eq!(store.get_device(MAC).await.unwrap().unwrap().nickname, None);

        assert!(!store.set_nickname("FF:FF:FF:FF:FF:FF", Some("ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("netpulse.db");

        let store = Store::open(&path).await.unwrap();
        store.upsert_device(MAC, Some("Acme"), t(0)).await.unwrap();
        store.close().await;
        assert!(path.exists());

        let reopened = Store::open(&path).await.unwrap();
        let devices = reopened.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].vendor.as_deref(), Some("Acme"));
        reopened.close().await;
    }

    #[test]
    fn test_timestamp_text_roundtrip_and_order() {
        let a = to_db(t(0));
        let b = to_db(t(0) + Duration::milliseconds(1));
        assert!(a < b);
        assert_eq!(from_db(&a).unwrap(), t(0));
        assert!(from_db("yesterday").is_err());
    }
}
