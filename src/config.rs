//! Configuration loading and management.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::mot::CrossingPolicy;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub tracker: TrackerConfig,
    pub crossing: CrossingConfig,
    pub detection: DetectionConfig,
    pub sink: SinkConfig,
    pub boundaries: BoundariesConfig,
}

/// What to do with a new frame when the processing queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Largest accepted frame record.
    pub max_record_bytes: u64,
    pub handshake_timeout_secs: u64,
    /// Frames buffered between the socket reader and the processing worker.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Consecutive undecodable frames tolerated before the session is closed. Unlimited if unset.
    pub max_consecutive_decode_failures: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8485)),
            max_record_bytes: 16 * 1024 * 1024,
            handshake_timeout_secs: 10,
            queue_capacity: 4,
            overflow: OverflowPolicy::DropOldest,
            max_consecutive_decode_failures: None,
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub max_disappeared: usize,
    pub max_match_distance: Option<f32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_disappeared: 30,
            max_match_distance: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossingConfig {
    pub policy: CrossingPolicy,
    pub side_margin: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detections at or below this confidence are ignored.
    pub confidence_threshold: f32,
    /// Inference endpoint receiving encoded frames. Detection is disabled when unset.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            endpoint: None,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Log,
    Jsonl,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Output file for `jsonl`.
    pub path: Option<PathBuf>,
    /// Webhook for `http`.
    pub url: Option<String>,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Log,
            path: None,
            url: None,
            timeout_ms: 3000,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundariesConfig {
    /// JSON document with one calibrated boundary per device id.
    pub path: PathBuf,
}

impl Default for BoundariesConfig {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: data_dir.join("boundaries.json"),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[allow(clippy::result_large_err)]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // CABINET_SERVER__LISTEN_ADDR, CABINET_TRACKER__MAX_DISAPPEARED, ...
        figment = figment.merge(Env::prefixed("CABINET_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cabinet-watch"))
}

/// Returns the platform-specific data directory.
///
/// On Linux: `~/.local/share/cabinet-watch`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("cabinet-watch"))
}
