//! Runtime configuration
//!
//! Layered the usual way: built-in defaults, then an optional config file
//! (YAML or TOML, picked by extension), then `ASHA_SYNC__*` environment
//! variables, e.g. `ASHA_SYNC__REMOTE__BACKEND=firestore` or
//! `ASHA_SYNC__SYNC__SETTLE_DELAY_MS=500`.

use crate::error::{SyncError, SyncResult};
use crate::local_db::LocalDbConfig;
use crate::remote::FirestoreConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ASHA_SYNC";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AshaSyncConfig {
    pub database: LocalDbConfig,
    pub remote: RemoteConfig,
    pub connectivity: ConnectivityConfig,
    pub sync: SyncConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Keep documents in process; nothing leaves the device
    #[default]
    Memory,
    Firestore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    pub firestore: FirestoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Endpoint probed with `HEAD` to decide internet reachability
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://firestore.googleapis.com/".to_string(),
            probe_timeout_secs: 5,
            poll_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait after connectivity returns before starting a pass
    pub settle_delay_ms: u64,
    /// Periodic pass interval; `0` disables the timer
    pub interval_secs: u64,
    /// Start a pass after every local write
    pub trigger_on_mutation: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            interval_secs: 300,
            trigger_on_mutation: true,
        }
    }
}

impl SyncConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

/// Principal to sign in with at startup, for unattended runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub principal_id: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AshaSyncConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(SyncError::Config(format!("Config file not found: {}", path.display())));
            }
            builder = builder.add_source(File::from(path));
        }

        let config: AshaSyncConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.database.db_path.trim().is_empty() {
            return Err(SyncError::Config("database.db_path must not be empty".to_string()));
        }
        if self.remote.backend == RemoteBackend::Firestore && self.remote.firestore.project_id.is_empty() {
            return Err(SyncError::Config(
                "remote.firestore.project_id is required for the firestore backend".to_string(),
            ));
        }
        if self.connectivity.poll_interval_secs == 0 {
            return Err(SyncError::Config("connectivity.poll_interval_secs must be positive".to_string()));
        }
        Ok(())
    }
}
