//! Application state
//!
//! Holds configuration and the shared components handed to API handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::realtime_hub::RealtimeHub;
use crate::reconciler::RetentionPolicy;
use crate::registry::RegistryStore;

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Persisted registry file
    pub data_file: PathBuf,
    /// Discovery (reconciliation) period TR
    pub discovery_interval: Duration,
    /// Reachability probe period TP
    pub probe_interval: Duration,
    /// WS-Discovery response collect window
    pub discovery_window: Duration,
    /// Echo requests per reachability measurement
    pub ping_count: u32,
    /// Per-reply ping timeout
    pub ping_timeout: Duration,
    /// Stream lookup request timeout
    pub lookup_timeout: Duration,
    /// What happens to devices a discovery round did not report
    pub retention: RetentionPolicy,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Static client assets directory
    pub static_dir: String,
}

impl AppConfig {
    /// Build from environment variables, with the inherited defaults
    /// (5 minute discovery, 1 minute probing, port 3001).
    pub fn from_env() -> crate::Result<Self> {
        let retention = match std::env::var("RETENTION_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => RetentionPolicy::default(),
        };

        Ok(Self {
            data_file: std::env::var("DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/cameraInfo.json")),
            discovery_interval: env_secs("DISCOVERY_INTERVAL_SECS", 300),
            probe_interval: env_secs("PROBE_INTERVAL_SECS", 60),
            discovery_window: env_secs("DISCOVERY_WINDOW_SECS", 5),
            ping_count: std::env::var("PING_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            ping_timeout: env_secs("PING_TIMEOUT_SECS", 2),
            lookup_timeout: env_secs("LOOKUP_TIMEOUT_SECS", 5),
            retention,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            static_dir: std::env::var("STATIC_DIR").unwrap_or_else(|_| "./client".to_string()),
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Registry store
    pub store: Arc<RegistryStore>,
    /// RealtimeHub (WebSocket observers)
    pub realtime: Arc<RealtimeHub>,
}
