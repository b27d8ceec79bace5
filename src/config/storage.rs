//! Storage configuration types.

use serde::Deserialize;

use super::{invalid, ConfigError};

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Sqlite,
    Postgres,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Sqlite => f.write_str("sqlite"),
            StorageType::Postgres => f.write_str("postgres"),
        }
    }
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
    /// PostgreSQL-specific configuration.
    #[serde(default)]
    pub postgres: PostgresConfig,
}

impl StorageConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self.storage_type {
            StorageType::Sqlite if self.sqlite.path.trim().is_empty() => {
                Err(invalid("storage.sqlite.path is required for sqlite storage"))
            }
            StorageType::Postgres if self.postgres.uri.trim().is_empty() => {
                Err(invalid("storage.postgres.uri is required for postgres storage"))
            }
            StorageType::Postgres
                if self.postgres.min_connections > self.postgres.max_connections =>
            {
                Err(invalid(
                    "storage.postgres.min_connections exceeds max_connections",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path. Parent directories are created on startup.
    pub path: String,
}

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// PostgreSQL connection URI.
    pub uri: String,
    /// Connections kept open in the pool.
    pub min_connections: u32,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            min_connections: 5,
            max_connections: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite(path: &str) -> StorageConfig {
        StorageConfig {
            storage_type: StorageType::Sqlite,
            sqlite: SqliteConfig {
                path: path.to_string(),
            },
            postgres: PostgresConfig::default(),
        }
    }

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 20);
    }

    #[test]
    fn test_sqlite_requires_path() {
        assert!(sqlite("").validate().is_err());
        assert!(sqlite("data/thistle.db").validate().is_ok());
    }

    #[test]
    fn test_postgres_requires_uri() {
        let mut config = sqlite("");
        config.storage_type = StorageType::Postgres;
        assert!(config.validate().is_err());

        config.postgres.uri = "postgres://localhost/thistle".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_pool_bounds() {
        let mut config = sqlite("");
        config.storage_type = StorageType::Postgres;
        config.postgres.uri = "postgres://localhost/thistle".to_string();
        config.postgres.min_connections = 30;
        assert!(config.validate().is_err());
    }
}
