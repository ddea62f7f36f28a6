//! Tap configuration file support.
//!
//! Configuration is a JSON document passed via `--config`:
//!
//! ```json
//! {
//!   "start_date": "2020-01-01T00:00:00Z",
//!   "api_token": "...",
//!   "organization": "my-org",
//!   "base_url": "https://sentry.example.com/api/0/",
//!   "rate_limit_rps": 5,
//!   "concurrency": 8,
//!   "max_pages": 10000,
//!   "request_timeout_secs": 60
//! }
//! ```
//!
//! `start_date`, `api_token`, and `organization` are required; everything
//! else has a built-in default.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Top-level tap configuration.
#[derive(Debug, Deserialize)]
pub struct TapConfig {
    /// Default window start when no bookmark exists yet (ISO8601).
    pub start_date: String,
    /// Bearer credential for the API.
    pub api_token: String,
    /// Organization slug to extract from.
    pub organization: String,
    /// API root override for self-hosted instances.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Pagination guard-rail override.
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Per-stream project fetch pool size.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Proactive rate limit in requests per second.
    #[serde(default)]
    pub rate_limit_rps: Option<u32>,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl TapConfig {
    /// Load and validate the configuration file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let raw = fs::read(path)
            .map_err(|e| format!("reading config file {}: {e}", path.display()))?;
        let config: TapConfig = serde_json::from_slice(&raw)
            .map_err(|e| format!("parsing config file {}: {e}", path.display()))?;

        if config.api_token.is_empty() {
            return Err("config key api_token must not be empty".into());
        }
        if config.organization.is_empty() {
            return Err("config key organization must not be empty".into());
        }

        Ok(config)
    }
}
