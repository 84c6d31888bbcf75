//! # Telemetry Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_COLLECTOR_ENDPOINT=collector.example.com                    │
//! │     BEACON_BATCH_SIZE=50                                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/beacon/beacon.toml (Linux)                               │
//! │     ~/Library/Application Support/com.beacon.telemetry/beacon.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The collector endpoint is usually supplied at runtime through
//! `TelemetryHandle::set_endpoint`; the config value only seeds it.
//!
//! ## Configuration File Format
//! ```toml
//! [collector]
//! endpoint = "collector.example.com"
//! secure = true
//! encoding = "base64"
//!
//! [queue]
//! batch_size = 50
//! flush_threshold = 10
//! flush_interval_ms = 10000
//!
//! [retry]
//! short = 60
//! medium = 3600
//! long = 604800
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use beacon_core::{
    RetryTiers, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_THRESHOLD,
    DEFAULT_LOCAL_EVENT_LIMIT, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_TICK_INTERVAL_MS,
};

use crate::codec::{AesGcmEncoder, PayloadEncoding};
use crate::error::{TelemetryError, TelemetryResult};
use crate::sink::CollectorEndpoint;

// =============================================================================
// Collector Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Collector host (optionally with port), without scheme or path.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Use https. Default: true
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Path prefix of the collector API.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Whole-request timeout (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub connect_timeout_ms: u64,

    /// How request bodies are wrapped in the `payload` envelope.
    #[serde(default)]
    pub encoding: PayloadEncoding,

    /// Base64 of a 32-byte key, required when `encoding = "aes_gcm"`.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_request_timeout() -> u64 {
    5_000
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            endpoint: None,
            secure: true,
            api_version: default_api_version(),
            request_timeout_ms: default_request_timeout(),
            connect_timeout_ms: default_request_timeout(),
            encoding: PayloadEncoding::default(),
            encryption_key: None,
        }
    }
}

impl CollectorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Endpoint seeded from configuration, if any.
    pub fn configured_endpoint(&self) -> Option<CollectorEndpoint> {
        self.endpoint
            .as_ref()
            .map(|host| CollectorEndpoint::new(host.clone(), self.secure))
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Event store and flush policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Events per delivery request.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Pending count that triggers an auto flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: i64,

    /// Age of the oldest pending event (ms) that triggers an auto flush.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: i64,

    /// Auto flushes are skipped for this long after a failure (ms).
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: i64,

    /// Auto-flush ticker period once ready (ms).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Maximum events kept on the device.
    #[serde(default = "default_local_event_limit")]
    pub local_event_limit: i64,

    /// Capacity of the external event bridge channel.
    #[serde(default = "default_bridge_capacity")]
    pub bridge_capacity: usize,

    /// Capacity of the caller command queue.
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_flush_threshold() -> i64 {
    DEFAULT_FLUSH_THRESHOLD
}
fn default_flush_interval() -> i64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_retry_backoff() -> i64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_local_event_limit() -> i64 {
    DEFAULT_LOCAL_EVENT_LIMIT
}
fn default_bridge_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    1_024
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            batch_size: default_batch_size(),
            flush_threshold: default_flush_threshold(),
            flush_interval_ms: default_flush_interval(),
            retry_backoff_ms: default_retry_backoff(),
            tick_interval_ms: default_tick_interval(),
            local_event_limit: default_local_event_limit(),
            bridge_capacity: default_bridge_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl QueueSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

// =============================================================================
// Bootstrap Settings
// =============================================================================

/// How long the service waits for the host to supply an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapSettings {
    #[serde(default = "default_initial_wait")]
    pub initial_wait_ms: u64,

    #[serde(default = "default_extended_wait")]
    pub extended_wait_ms: u64,
}

fn default_initial_wait() -> u64 {
    1_000
}
fn default_extended_wait() -> u64 {
    5_000
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        BootstrapSettings {
            initial_wait_ms: default_initial_wait(),
            extended_wait_ms: default_extended_wait(),
        }
    }
}

impl BootstrapSettings {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    pub fn extended_wait(&self) -> Duration {
        Duration::from_millis(self.extended_wait_ms)
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Tier delays in seconds (`short`, `medium`, `long`).
    #[serde(flatten)]
    pub tiers: RetryTiers,

    /// How long a wake waits for the service to become ready (ms).
    #[serde(default = "default_wake_timeout")]
    pub wake_timeout_ms: u64,
}

fn default_wake_timeout() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            tiers: RetryTiers::default(),
            wake_timeout_ms: default_wake_timeout(),
        }
    }
}

impl RetrySettings {
    pub fn wake_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_timeout_ms)
    }
}

// =============================================================================
// Profile Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSettings {
    /// Bound on the install referrer lookup (ms).
    #[serde(default = "default_referrer_timeout")]
    pub referrer_timeout_ms: u64,
}

fn default_referrer_timeout() -> u64 {
    5_000
}

impl Default for ProfileSettings {
    fn default() -> Self {
        ProfileSettings {
            referrer_timeout_ms: default_referrer_timeout(),
        }
    }
}

impl ProfileSettings {
    pub fn referrer_timeout(&self) -> Duration {
        Duration::from_millis(self.referrer_timeout_ms)
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "beacon", "telemetry")
                .map(|dirs| dirs.data_dir().join("beacon.db"))
                .unwrap_or_else(|| PathBuf::from("beacon.db"))
        })
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub collector: CollectorSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub bootstrap: BootstrapSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub profile: ProfileSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl TelemetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (beacon.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> TelemetryResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading telemetry config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load telemetry config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn save(&self, config_path: Option<PathBuf>) -> TelemetryResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| TelemetryError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Telemetry config saved");
        Ok(())
    }

    pub fn validate(&self) -> TelemetryResult<()> {
        if let Some(endpoint) = self.collector.configured_endpoint() {
            endpoint.base_url(&self.collector.api_version)?;
        }

        if self.collector.api_version.trim().is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "api_version must not be empty".into(),
            ));
        }

        if self.collector.encoding == PayloadEncoding::AesGcm {
            let key = self.collector.encryption_key.as_deref().ok_or_else(|| {
                TelemetryError::InvalidConfig("encryption_key is required for aes_gcm".into())
            })?;
            AesGcmEncoder::from_base64_key(key)?;
        }

        if self.queue.batch_size == 0 {
            return Err(TelemetryError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.queue.flush_threshold <= 0 || self.queue.local_event_limit <= 0 {
            return Err(TelemetryError::InvalidConfig(
                "flush_threshold and local_event_limit must be positive".into(),
            ));
        }

        if self.queue.tick_interval_ms == 0 {
            return Err(TelemetryError::InvalidConfig(
                "tick_interval_ms must be greater than 0".into(),
            ));
        }

        if self.queue.bridge_capacity == 0 || self.queue.command_capacity == 0 {
            return Err(TelemetryError::InvalidConfig(
                "channel capacities must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("BEACON_COLLECTOR_ENDPOINT") {
            debug!(endpoint = %endpoint, "Overriding collector endpoint from environment");
            self.collector.endpoint = Some(endpoint);
        }

        if let Ok(secure) = std::env::var("BEACON_COLLECTOR_SECURE") {
            match secure.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.collector.secure = true,
                "0" | "false" | "no" => self.collector.secure = false,
                _ => warn!(value = %secure, "Unknown BEACON_COLLECTOR_SECURE value"),
            }
        }

        if let Ok(encoding) = std::env::var("BEACON_PAYLOAD_ENCODING") {
            match encoding.parse() {
                Ok(parsed) => self.collector.encoding = parsed,
                Err(e) => warn!(error = %e, "Ignoring BEACON_PAYLOAD_ENCODING"),
            }
        }

        if let Ok(key) = std::env::var("BEACON_ENCRYPTION_KEY") {
            self.collector.encryption_key = Some(key);
        }

        if let Ok(size) = std::env::var("BEACON_BATCH_SIZE") {
            if let Ok(n) = size.parse::<u32>() {
                self.queue.batch_size = n;
            }
        }

        if let Ok(threshold) = std::env::var("BEACON_FLUSH_THRESHOLD") {
            if let Ok(n) = threshold.parse::<i64>() {
                self.queue.flush_threshold = n;
            }
        }

        if let Ok(limit) = std::env::var("BEACON_LOCAL_EVENT_LIMIT") {
            if let Ok(n) = limit.parse::<i64>() {
                self.queue.local_event_limit = n;
            }
        }

        if let Ok(path) = std::env::var("BEACON_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beacon", "telemetry")
            .map(|dirs| dirs.config_dir().join("beacon.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.queue.batch_size, 50);
        assert_eq!(config.queue.flush_threshold, 10);
        assert_eq!(config.queue.flush_interval_ms, 10_000);
        assert_eq!(config.queue.retry_backoff_ms, 10_000);
        assert_eq!(config.queue.tick_interval_ms, 3_000);
        assert_eq!(config.bootstrap.initial_wait(), Duration::from_secs(1));
        assert_eq!(config.bootstrap.extended_wait(), Duration::from_secs(5));
        assert_eq!(config.retry.wake_timeout(), Duration::from_secs(10));
        assert_eq!(config.collector.request_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [collector]
            endpoint = "collector.example.com"

            [retry]
            short = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.collector.endpoint.as_deref(), Some("collector.example.com"));
        assert!(config.collector.secure);
        assert_eq!(config.retry.tiers.short, Duration::from_secs(5));
        assert_eq!(config.retry.tiers.medium, Duration::from_secs(3_600));
        assert_eq!(config.queue.batch_size, 50);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TelemetryConfig::default();

        config.queue.batch_size = 0;
        assert!(config.validate().is_err());
        config.queue.batch_size = 50;

        config.collector.endpoint = Some("https://bad/host".into());
        assert!(config.validate().is_err());
        config.collector.endpoint = Some("collector.example.com:8443".into());
        assert!(config.validate().is_ok());

        config.collector.encoding = PayloadEncoding::AesGcm;
        assert!(config.validate().is_err());
        config.collector.encryption_key = Some(AesGcmEncoder::generate_key_base64());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("beacon.toml");

        let mut config = TelemetryConfig::default();
        config.collector.endpoint = Some("collector.example.com".into());
        config.queue.flush_threshold = 25;
        config.save(Some(path.clone())).unwrap();

        let loaded = TelemetryConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.collector.endpoint.as_deref(), Some("collector.example.com"));
        assert_eq!(loaded.queue.flush_threshold, 25);
    }

    #[test]
    fn test_toml_sections() {
        let toml_str = toml::to_string_pretty(&TelemetryConfig::default()).unwrap();
        assert!(toml_str.contains("[collector]"));
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("[retry]"));
    }
}
