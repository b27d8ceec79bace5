//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that is loaded once at startup from YAML files and environment variables,
//! validated, and then shared read-only with every component.

mod broker;
mod logging;
mod processing;
mod server;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

pub use broker::BrokerConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use processing::{ProcessingConfig, StreamingConfig};
pub use server::ServerConfig;
pub use storage::{PostgresConfig, SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "THISTLE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "THISTLE";
/// Environment variable for logging filter directives.
pub const LOG_ENV_VAR: &str = "THISTLE_LOG";

/// Errors raised while loading or validating configuration.
///
/// Both variants are fatal: the process must not start with them.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Broker connection and topics.
    pub broker: BrokerConfig,
    /// Durable store selection and location.
    pub storage: StorageConfig,
    /// Background processing loop.
    pub processing: ProcessingConfig,
    /// Live subscriber fan-out.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Log level and output format.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Explicit file this configuration was loaded from, reused by `reload`.
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::from(config_path).format(FileFormat::Yaml));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let raw = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = raw.try_deserialize()?;
        config.source_path = path.map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, without consulting files or environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, File, FileFormat};

        let raw = ConfigLib::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        let config: Config = raw.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Re-read the same sources this configuration came from.
    ///
    /// Returns a new value; the receiver is left untouched so components holding
    /// it keep a consistent view.
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Self::load(self.source_path.as_deref())
    }

    /// Check semantic constraints that deserialization cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.storage.validate()?;
        self.processing.validate()?;
        self.streaming.validate()?;
        Ok(())
    }
}

/// Configuration handle whose value can be replaced by a reload.
///
/// Readers take a snapshot with [`SharedConfig::current`]; a reload swaps the
/// snapshot and never mutates one in place.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read the sources of the current configuration and swap it in.
    ///
    /// On failure the current configuration stays in place.
    pub fn reload(&self) -> Result<Arc<Config>, ConfigError> {
        let next = Arc::new(self.current().reload()?);
        match self.inner.write() {
            Ok(mut guard) => *guard = next.clone(),
            Err(poisoned) => *poisoned.into_inner() = next.clone(),
        }
        Ok(next)
    }
}

pub(crate) fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
