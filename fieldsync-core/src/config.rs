//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the offline engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the local SQLite database file
    pub db_path: String,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Transient failures tolerated before an action becomes failed-fatal
    pub max_retries: u32,
    /// Connectivity readings must hold this long before they count as a transition
    pub settle_window_ms: u64,
    /// Remote equipment API
    pub remote: RemoteConfig,
    /// Reachability probe; without one the engine assumes it is online
    pub probe: Option<ProbeConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "fieldsync_local.db".to_string(),
            enable_wal: true,
            max_connections: 5,
            max_retries: 3,
            settle_window_ms: 500,
            remote: RemoteConfig::default(),
            probe: None,
        }
    }
}

impl EngineConfig {
    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL the action urls are joined onto
    pub base_url: String,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            auth_token: None,
            request_timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reachability probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// URL polled to decide reachability; any HTTP response counts as online
    pub url: String,
    /// Seconds between polls
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,
}

fn default_probe_interval() -> u64 {
    10
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
