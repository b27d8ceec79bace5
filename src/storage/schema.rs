//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Table DDL differs per dialect and lives next to each `SqlDatabase` impl.

use sea_query::Iden;

/// Messages table schema.
#[derive(Iden)]
pub enum Messages {
    #[iden = "messages"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "topic"]
    Topic,
    #[iden = "payload"]
    Payload,
    #[iden = "timestamp"]
    Timestamp,
    #[iden = "processed"]
    Processed,
}

/// SQLite DDL for the messages table.
pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    topic TEXT NOT NULL,
    payload TEXT NOT NULL,
    "timestamp" INTEGER NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE
)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_messages_unprocessed ON messages (processed, "timestamp", id)"#,
];

/// PostgreSQL DDL for the messages table.
pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS messages (
    id BIGSERIAL PRIMARY KEY,
    topic TEXT NOT NULL,
    payload TEXT NOT NULL,
    "timestamp" BIGINT NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE
)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_messages_unprocessed ON messages (processed, "timestamp", id)"#,
];
