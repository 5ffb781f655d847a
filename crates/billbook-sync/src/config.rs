//! # Engine Configuration
//!
//! Configuration management for the payment engine and the sync daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BILLBOOK_REMOTE_URL=https://api.billbook.example                   │
//! │     BILLBOOK_DEVICE_ID=abc-123                                         │
//! │     BILLBOOK_OFFLINE=1                                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/billbook/engine.toml (Linux)                             │
//! │     ~/Library/Application Support/com.billbook.billbook/engine.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     No remote URL (offline), tolerance 2, auto-generated device_id     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # engine.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Counter 1"
//!
//! [remote]
//! base_url = "https://api.billbook.example/v1"
//! api_token = "..."
//! request_timeout_secs = 10
//!
//! [sync]
//! drain_interval_secs = 30
//! probe_interval_secs = 15
//!
//! [reconcile]
//! overpayment_tolerance_minor = 2
//!
//! [database]
//! path = "/var/lib/billbook/billbook.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use billbook_core::{Tolerance, DEFAULT_OVERPAYMENT_TOLERANCE_MINOR};

use crate::error::ConfigError;

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Counter 1", "Back Office").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Billing Counter".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Store Settings
// =============================================================================

/// Where the authoritative store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the REST API. `None` runs the engine local-only.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent on every request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout (seconds). A timeout counts as a transport failure.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            api_token: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Background drain and connectivity probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between scheduled queue drains (seconds).
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Interval between connectivity probes (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// First retry delay after a drain left entries behind (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound for the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Force offline operation: never contact the remote store.
    #[serde(default)]
    pub offline: bool,
}

fn default_drain_interval() -> u64 {
    30
}
fn default_probe_interval() -> u64 {
    15
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            drain_interval_secs: default_drain_interval(),
            probe_interval_secs: default_probe_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            offline: false,
        }
    }
}

// =============================================================================
// Reconcile Settings
// =============================================================================

/// Invoice reconciliation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// How far (in minor units) the paid sum may exceed the grand total.
    #[serde(default = "default_tolerance")]
    pub overpayment_tolerance_minor: i64,
}

fn default_tolerance() -> i64 {
    DEFAULT_OVERPAYMENT_TOLERANCE_MINOR
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        ReconcileSettings {
            overpayment_tolerance_minor: default_tolerance(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Local store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
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
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> Result<(), ConfigError> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| ConfigError::SaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.id.trim().is_empty() {
            return Err(ConfigError::MissingDeviceId);
        }

        if let Some(ref raw) = self.remote.base_url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.remote.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.drain_interval_secs == 0 || self.sync.probe_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "drain and probe intervals must be greater than 0".into(),
            ));
        }

        if self.sync.initial_backoff_ms > self.sync.max_backoff_secs.saturating_mul(1000) {
            return Err(ConfigError::InvalidConfig(
                "initial_backoff_ms must not exceed max_backoff_secs".into(),
            ));
        }

        if self.reconcile.overpayment_tolerance_minor < 0 {
            return Err(ConfigError::InvalidConfig(
                "overpayment_tolerance_minor must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("BILLBOOK_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("BILLBOOK_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = Some(url).filter(|u| !u.is_empty());
        }

        if let Ok(token) = std::env::var("BILLBOOK_REMOTE_TOKEN") {
            self.remote.api_token = Some(token).filter(|t| !t.is_empty());
        }

        if let Ok(path) = std::env::var("BILLBOOK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(offline) = std::env::var("BILLBOOK_OFFLINE") {
            match offline.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.sync.offline = true,
                "0" | "false" | "no" => self.sync.offline = false,
                _ => warn!(value = %offline, "Unknown BILLBOOK_OFFLINE value in environment"),
            }
        }

        if let Ok(tolerance) = std::env::var("BILLBOOK_OVERPAYMENT_TOLERANCE") {
            match tolerance.parse::<i64>() {
                Ok(t) => self.reconcile.overpayment_tolerance_minor = t,
                Err(_) => warn!(value = %tolerance, "Ignoring non-numeric tolerance override"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "billbook", "billbook")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the remote URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.base_url.as_deref()
    }

    /// Returns true if the engine may contact the remote store at all.
    pub fn is_sync_enabled(&self) -> bool {
        !self.sync.offline && self.remote.base_url.is_some()
    }

    /// The configured overpayment tolerance.
    pub fn tolerance(&self) -> Tolerance {
        Tolerance::from_minor(self.reconcile.overpayment_tolerance_minor)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.sync.drain_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs)
    }

    /// Database file: configured path, else `<data dir>/billbook.db`.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            Self::project_dirs()
                .map(|dirs| dirs.data_dir().join("billbook.db"))
                .unwrap_or_else(|| PathBuf::from("billbook.db"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.reconcile.overpayment_tolerance_minor, 2);
        assert_eq!(config.remote.request_timeout_secs, 10);
        assert!(!config.is_sync_enabled());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::MissingDeviceId)));

        config.device.id = "counter-1".to_string();
        config.remote.base_url = Some("ws://localhost:8080".to_string());
        assert!(config.validate().is_err());

        config.remote.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.remote.base_url = Some("https://api.billbook.example/v1".to_string());
        assert!(config.validate().is_ok());
        assert!(config.is_sync_enabled());

        config.reconcile.overpayment_tolerance_minor = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offline_flag_disables_sync() {
        let mut config = EngineConfig::default();
        config.remote.base_url = Some("https://api.billbook.example".to_string());
        config.sync.offline = true;
        assert!(!config.is_sync_enabled());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [device]
            id = "counter-7"

            [reconcile]
            overpayment_tolerance_minor = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id(), "counter-7");
        assert_eq!(config.device.name, "Billing Counter");
        assert_eq!(config.tolerance(), Tolerance::exact());
        assert_eq!(config.sync.drain_interval_secs, 30);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.remote.base_url = Some("http://127.0.0.1:9000".to_string());
        config.save(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.device_id(), config.device_id());
        assert_eq!(loaded.remote_url(), Some("http://127.0.0.1:9000"));
    }
}
