//! HTTP client for a running netpulse-server.

use anyhow::{Context, Result};
use netpulse_core::ScanResult;
use serde::Deserialize;
use std::time::Duration;

/// Default server address
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// Longer than the server's default 90s scan limit.
const SCAN_REQUEST_TIMEOUT: Duration = Duration::from_secs(95);

/// Error body returned by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: String,
    message: String,
}

pub struct ServerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SCAN_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: normalize_base_url(base_url),
            http,
        })
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!("Server returned error: {}", resp.status()));
        }

        resp.json().await.context("Failed to parse health response")
    }

    pub async fn scan(&self) -> Result<ScanResult> {
        let url = format!("{}/scan/devices", self.base_url);
        tracing::debug!("Requesting scan from {}", url);

        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Server returned {}: {}",
                status,
                describe_error(&body)
            ));
        }

        resp.json::<ScanResult>()
            .await
            .context("Failed to parse scan response")
    }
}

fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

/// `message (error_code)` from a JSON error body, else the raw text.
fn describe_error(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => format!("{} ({})", err.message, err.error_code),
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://127.0.0.1:8000/"), "http://127.0.0.1:8000");
        assert_eq!(normalize_base_url(" 10.0.0.5:8000 "), "http://10.0.0.5:8000");
        assert_eq!(normalize_base_url("https://netpulse.lan"), "https://netpulse.lan");
    }

    #[test]
    fn test_describe_error() {
        assert_eq!(
            describe_error(r#"{"error_code":"SCAN_IN_PROGRESS","message":"A scan is already running."}"#),
            "A scan is already running. (SCAN_IN_PROGRESS)"
        );
        assert_eq!(describe_error("Bad Gateway"), "Bad Gateway");
        assert_eq!(describe_error(""), "no details");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_error() {
        // Nothing listens on port 9 (discard) locally.
        let client = ServerClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.health().await.is_err());
    }
}
