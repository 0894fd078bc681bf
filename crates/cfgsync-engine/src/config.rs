//! Synchronizer configuration.
//!
//! A [`SyncConfig`] names the namespace a tree lives under and the transport
//! that stores it. It is read from TOML and may be overridden from the
//! environment:
//!
//! | variable             | field        |
//! |----------------------|--------------|
//! | `CFGSYNC_NAMESPACE`  | `namespace`  |
//! | `CFGSYNC_TIMEOUT_MS` | `timeout_ms` |
//! | `CFGSYNC_DB_PATH`    | `db_path` (also selects the SQLite backend) |
//!
//! ```
//! use cfgsync_engine::config::{Backend, SyncConfig};
//!
//! let config = SyncConfig::from_toml_str(r#"
//!     namespace = "apps/web"
//!     backend = "sqlite"
//!     db_path = "/var/lib/cfgsync.db"
//! "#).unwrap();
//! assert_eq!(config.backend, Backend::Sqlite);
//! assert_eq!(config.timeout_ms, 5000);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cfgsync_storage::{InMemoryStore, KvTransport, SqliteStore, TransportConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SyncError;

pub const ENV_NAMESPACE: &str = "CFGSYNC_NAMESPACE";
pub const ENV_TIMEOUT_MS: &str = "CFGSYNC_TIMEOUT_MS";
pub const ENV_DB_PATH: &str = "CFGSYNC_DB_PATH";

/// Which transport backs the synchronizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Root path prefix of the tree; empty stores fields directly under `/`.
    pub namespace: String,
    /// Upper bound on one store round trip.
    pub timeout_ms: u64,
    /// Watch events retained for replay.
    pub history: usize,
    pub backend: Backend,
    /// Database file of the SQLite backend.
    pub db_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            namespace: String::new(),
            timeout_ms: TransportConfig::DEFAULT_TIMEOUT.as_millis() as u64,
            history: TransportConfig::DEFAULT_HISTORY,
            backend: Backend::Memory,
            db_path: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, SyncError> {
        Self::parse(text, None)
    }

    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = fs::read_to_string(path).map_err(|e| SyncError::Config {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;
        Self::parse(&text, Some(path))
    }

    fn parse(text: &str, origin: Option<&Path>) -> Result<Self, SyncError> {
        let config: SyncConfig = toml::from_str(text).map_err(|e| SyncError::Config {
            path: origin.map(Path::to_path_buf),
            message: e.message().to_string(),
        })?;
        config.validate_at(origin)?;
        Ok(config)
    }

    /// Applies the `CFGSYNC_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self, SyncError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = timeout.trim().parse().map_err(|_| SyncError::Config {
                path: None,
                message: format!("{ENV_TIMEOUT_MS} must be a number of milliseconds, got '{timeout}'"),
            })?;
        }
        if let Some(db_path) = lookup(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(db_path));
            self.backend = Backend::Sqlite;
        }
        self.validate_at(None)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        self.validate_at(None)
    }

    fn validate_at(&self, origin: Option<&Path>) -> Result<(), SyncError> {
        let invalid = |message: &str| SyncError::Config {
            path: origin.map(Path::to_path_buf),
            message: message.to_string(),
        };
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        if self.backend == Backend::Sqlite && self.db_path.is_none() {
            return Err(invalid("the sqlite backend requires db_path"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout(),
            history: self.history,
        }
    }

    /// Opens the configured transport.
    pub fn open_store(&self) -> Result<Box<dyn KvTransport>, SyncError> {
        self.validate()?;
        let config = self.transport_config();
        match (self.backend, &self.db_path) {
            (Backend::Sqlite, Some(path)) => {
                let path_str = path.to_str().ok_or_else(|| SyncError::Config {
                    path: Some(path.clone()),
                    message: "db_path is not valid UTF-8".to_string(),
                })?;
                info!(db_path = %path.display(), "opening sqlite store");
                Ok(Box::new(SqliteStore::open_with_config(path_str, config)?))
            }
            _ => {
                info!("opening in-memory store");
                Ok(Box::new(InMemoryStore::with_config(config)))
            }
        }
    }
}
