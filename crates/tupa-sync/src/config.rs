//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TUPA_DATABASE_PATH=/var/lib/tupa/tupa.db                            │
//! │     TUPA_ERP_URL=https://erp.example.com                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos-sync/engine.toml (Linux)                             │
//! │     ~/Library/Application Support/com.tupa.pos-sync/engine.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "tupa.db"
//!
//! [sync]
//! default_batch_size = 100
//! batch_delay_ms = 100
//! default_window_hours = 24
//!
//! [erp]
//! url = "https://erp.example.com"
//! database = "tupa"
//! username = "sync@tupa"
//! password = "secret"
//!
//! [[clients]]
//! client_id = "c1"
//! pos_type = "square"
//! location_id = "L1"
//! [clients.pos_config]
//! access_token = "sq0atp-..."
//! location_id = "L1"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use tupa_core::DEFAULT_BATCH_SIZE;

// =============================================================================
// Database Settings
// =============================================================================

/// Local SQLite store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite file (created if missing).
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tupa.db")
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Orchestrator behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Batch size used when a client sets none.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Pacing delay between batches (milliseconds).
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,

    /// Window fetched when no last sync is known (hours).
    #[serde(default = "default_window_hours")]
    pub default_window_hours: i64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_batch_delay() -> u64 {
    100
}
fn default_window_hours() -> i64 {
    24
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            default_batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay(),
            default_window_hours: default_window_hours(),
        }
    }
}

impl SyncSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// =============================================================================
// ERP Settings
// =============================================================================

/// ERP endpoint and push behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErpSettings {
    /// Base URL of the ERP (http:// or https://).
    #[serde(default)]
    pub url: String,

    /// ERP database name sent on login.
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Model consumption records are written to.
    #[serde(default = "default_model")]
    pub model: String,

    /// Records pushed per chunk.
    #[serde(default = "default_erp_batch_size")]
    pub batch_size: usize,

    /// Pacing delay between chunks (milliseconds).
    #[serde(default = "default_erp_batch_delay")]
    pub batch_delay_ms: u64,

    /// Tries per create/update, including the first one.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay; the n-th retry waits `n × retry_delay_ms`.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Search by external id before writing.
    #[serde(default = "default_true")]
    pub deduplication: bool,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Age after which `processed` ERP records are deleted.
    #[serde(default)]
    pub cleanup_after_days: Option<u32>,
}

fn default_model() -> String {
    "tupa.consumption".to_string()
}
fn default_erp_batch_size() -> usize {
    50
}
fn default_erp_batch_delay() -> u64 {
    500
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    30
}

impl Default for ErpSettings {
    fn default() -> Self {
        ErpSettings {
            url: String::new(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            model: default_model(),
            batch_size: default_erp_batch_size(),
            batch_delay_ms: default_erp_batch_delay(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            deduplication: default_true(),
            timeout_secs: default_timeout(),
            cleanup_after_days: None,
        }
    }
}

impl ErpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    fn validate(&self) -> SyncResult<()> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(SyncError::InvalidUrl(format!(
                "ERP URL must start with http:// or https://, got: '{}'",
                self.url
            )));
        }
        url::Url::parse(&self.url)?;

        if self.database.trim().is_empty() || self.username.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "erp.database and erp.username are required".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "erp.batch_size must be greater than 0".into(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "erp.retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// One client whose POS is synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier used in records and dedup keys.
    pub client_id: String,

    /// Registered provider slug (e.g. "square", "toast").
    pub pos_type: String,

    /// Location the client's records are stored under.
    #[serde(default)]
    pub location_id: Option<String>,

    /// Caller batch size for this client.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Provider-specific settings, validated by the provider factory.
    #[serde(default = "empty_table")]
    pub pos_config: serde_json::Value,
}

fn empty_table() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    /// ERP connection; absent when records are only kept locally.
    #[serde(default)]
    pub erp: Option<ErpSettings>,

    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document without touching the environment.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.default_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.default_batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.default_window_hours <= 0 {
            return Err(SyncError::InvalidConfig(
                "sync.default_window_hours must be greater than 0".into(),
            ));
        }

        if let Some(erp) = &self.erp {
            erp.validate()?;
        }

        let mut seen = HashSet::new();
        for client in &self.clients {
            if client.client_id.trim().is_empty() {
                return Err(SyncError::InvalidConfig("client_id must not be empty".into()));
            }
            if !seen.insert(client.client_id.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate client_id '{}'",
                    client.client_id
                )));
            }
            if client.batch_size == Some(0) {
                return Err(SyncError::InvalidConfig(format!(
                    "client '{}': batch_size must be greater than 0",
                    client.client_id
                )));
            }
            if !client.pos_config.is_object() {
                return Err(SyncError::InvalidConfig(format!(
                    "client '{}': pos_config must be a table",
                    client.client_id
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("TUPA_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(size) = var("TUPA_BATCH_SIZE") {
            match size.parse::<usize>() {
                Ok(n) => self.sync.default_batch_size = n,
                Err(_) => warn!(value = %size, "Ignoring invalid TUPA_BATCH_SIZE"),
            }
        }

        if let Some(delay) = var("TUPA_BATCH_DELAY_MS") {
            match delay.parse::<u64>() {
                Ok(ms) => self.sync.batch_delay_ms = ms,
                Err(_) => warn!(value = %delay, "Ignoring invalid TUPA_BATCH_DELAY_MS"),
            }
        }

        let erp_vars = [
            var("TUPA_ERP_URL"),
            var("TUPA_ERP_DATABASE"),
            var("TUPA_ERP_USERNAME"),
            var("TUPA_ERP_PASSWORD"),
        ];
        if erp_vars.iter().any(Option::is_some) {
            let erp = self.erp.get_or_insert_with(ErpSettings::default);
            let [url, database, username, password] = erp_vars;
            if let Some(url) = url {
                debug!(url = %url, "Overriding ERP URL from environment");
                erp.url = url;
            }
            if let Some(database) = database {
                erp.database = database;
            }
            if let Some(username) = username {
                erp.username = username;
            }
            if let Some(password) = password {
                erp.password = password;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tupa", "pos-sync")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    /// Looks up a configured client.
    pub fn client(&self, client_id: &str) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [database]
        path = "/tmp/tupa.db"

        [sync]
        batch_delay_ms = 0

        [erp]
        url = "https://erp.example.com"
        database = "tupa"
        username = "sync@tupa"
        password = "secret"
        retry_attempts = 5

        [[clients]]
        client_id = "c1"
        pos_type = "square"
        location_id = "L1"
        batch_size = 200
        [clients.pos_config]
        access_token = "token"
        location_id = "L1"

        [[clients]]
        client_id = "c2"
        pos_type = "toast"
    "#;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sync.default_batch_size, 100);
        assert_eq!(config.sync.batch_delay_ms, 100);
        assert_eq!(config.sync.default_window_hours, 24);
        assert_eq!(config.database.path, PathBuf::from("tupa.db"));
        assert!(config.erp.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        let erp = config.erp.as_ref().unwrap();
        assert_eq!(erp.model, "tupa.consumption");
        assert_eq!(erp.batch_size, 50);
        assert_eq!(erp.retry_attempts, 5);
        assert_eq!(erp.retry_delay_ms, 1000);
        assert!(erp.deduplication);

        let c1 = config.client("c1").unwrap();
        assert_eq!(c1.batch_size, Some(200));
        assert_eq!(c1.pos_config["access_token"], "token");

        let c2 = config.client("c2").unwrap();
        assert!(c2.pos_config.as_object().unwrap().is_empty());
        assert_eq!(c2.location_id, None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::from_toml(SAMPLE).unwrap();

        config.clients[1].client_id = "c1".to_string();
        assert!(config.validate().is_err());

        config.clients[1].client_id = "c2".to_string();
        config.erp.as_mut().unwrap().url = "ftp://erp".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.erp.as_mut().unwrap().url = "http://erp.local".to_string();
        config.erp.as_mut().unwrap().retry_attempts = 0;
        assert!(config.validate().is_err());

        config.erp.as_mut().unwrap().retry_attempts = 1;
        config.sync.default_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TUPA_DATABASE_PATH", "/data/tupa.db"),
            ("TUPA_BATCH_SIZE", "250"),
            ("TUPA_BATCH_DELAY_MS", "not-a-number"),
            ("TUPA_ERP_URL", "https://erp.internal"),
            ("TUPA_ERP_PASSWORD", "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/data/tupa.db"));
        assert_eq!(config.sync.default_batch_size, 250);
        assert_eq!(config.sync.batch_delay_ms, 100);
        let erp = config.erp.unwrap();
        assert_eq!(erp.url, "https://erp.internal");
        assert_eq!(erp.password, "from-env");
        assert_eq!(erp.model, "tupa.consumption");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let config = EngineConfig::from_toml(SAMPLE).unwrap();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded = EngineConfig::from_toml(&contents).unwrap();
        assert_eq!(reloaded, config);
    }
}
