//! Unified SQL storage implementation.
//!
//! This module provides the shared `MessageStore` implementation for SQL-based
//! backends (PostgreSQL, SQLite). The implementation is parameterized by
//! database type using the `SqlDatabase` trait.

mod message_store;
mod query;

pub use message_store::SqlMessageStore;
pub use query::SqlDatabase;

#[cfg(feature = "postgres")]
pub mod postgres {
    //! PostgreSQL database backend.

    use sea_query::PostgresQueryBuilder;
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use tracing::info;

    use crate::config::PostgresConfig;
    use crate::storage::schema::POSTGRES_SCHEMA;
    use crate::storage::Result;

    /// PostgreSQL database marker type.
    pub struct Postgres;

    impl super::SqlDatabase for Postgres {
        type Pool = PgPool;

        const NAME: &'static str = "postgres";
        const SCHEMA: &'static [&'static str] = POSTGRES_SCHEMA;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(PostgresQueryBuilder)
        }
    }

    /// PostgreSQL message store.
    pub type PostgresMessageStore = super::SqlMessageStore<Postgres>;

    impl PostgresMessageStore {
        /// Create the connection pool and ensure the schema exists.
        pub async fn connect(config: &PostgresConfig) -> Result<Self> {
            let pool = PgPoolOptions::new()
                .min_connections(config.min_connections)
                .max_connections(config.max_connections)
                .connect(&config.uri)
                .await?;

            info!(
                min_connections = config.min_connections,
                max_connections = config.max_connections,
                "PostgreSQL connection pool created"
            );

            let store = Self::new(pool);
            store.init().await?;
            Ok(store)
        }
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    //! SQLite database backend.

    use std::str::FromStr;

    use sea_query::SqliteQueryBuilder;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use sqlx::SqlitePool;
    use tracing::info;

    use crate::config::SqliteConfig;
    use crate::storage::schema::SQLITE_SCHEMA;
    use crate::storage::Result;

    /// SQLite database marker type.
    pub struct Sqlite;

    impl super::SqlDatabase for Sqlite {
        type Pool = SqlitePool;

        const NAME: &'static str = "sqlite";
        const SCHEMA: &'static [&'static str] = SQLITE_SCHEMA;

        fn build_select(stmt: sea_query::SelectStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_insert(stmt: sea_query::InsertStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }

        fn build_update(stmt: sea_query::UpdateStatement) -> String {
            stmt.to_string(SqliteQueryBuilder)
        }
    }

    /// SQLite message store.
    pub type SqliteMessageStore = super::SqlMessageStore<Sqlite>;

    impl SqliteMessageStore {
        /// Open (creating if needed) the database file in WAL mode and ensure the schema exists.
        pub async fn connect(config: &SqliteConfig) -> Result<Self> {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal);

            let pool = SqlitePoolOptions::new().connect_with(options).await?;
            info!(path = %config.path, "SQLite database connection established");

            let store = Self::new(pool);
            store.init().await?;
            Ok(store)
        }

        /// Private in-memory database on a single pinned connection.
        pub async fn in_memory() -> Result<Self> {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;

            let store = Self::new(pool);
            store.init().await?;
            Ok(store)
        }
    }
}
