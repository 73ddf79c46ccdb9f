//! Error types for the discovery engine.
//!
//! Only admission rejections and the scan deadline are expected failures.
//! Per-host misses (no MAC, no hostname, no vendor) never surface here; they
//! degrade to `None` fields on the result instead.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan rate limit exceeded. Please wait {:.1}s.", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("A scan is already running.")]
    Busy,

    #[error("Scan {scan_id} timed out after {}s.", limit.as_secs())]
    Timeout { scan_id: i64, limit: Duration },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanError {
    /// Rate-limited and busy rejections happen before any state changes;
    /// the caller can simply retry later.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Busy)
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_classification() {
        assert!(ScanError::Busy.is_admission_rejection());
        assert!(
            ScanError::RateLimited {
                retry_after: Duration::from_millis(1500)
            }
            .is_admission_rejection()
        );
        assert!(
            !ScanError::Timeout {
                scan_id: 7,
                limit: Duration::from_secs(90)
            }
            .is_admission_rejection()
        );
    }

    #[test]
    fn test_messages() {
        let err = ScanError::Timeout {
            scan_id: 7,
            limit: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "Scan 7 timed out after 90s.");
        assert_eq!(ScanError::Busy.to_string(), "A scan is already running.");
    }
}
