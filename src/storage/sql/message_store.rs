//! Unified SQL MessageStore implementation.
//!
//! Uses a macro to generate implementations for each SQL backend,
//! eliminating code duplication while maintaining type safety.

use std::marker::PhantomData;

use super::SqlDatabase;

/// SQL-based implementation of MessageStore.
///
/// This generic implementation works with any SQL database that implements
/// the `SqlDatabase` trait (PostgreSQL, SQLite).
pub struct SqlMessageStore<DB: SqlDatabase> {
    pool: DB::Pool,
    _marker: PhantomData<DB>,
}

impl<DB: SqlDatabase> SqlMessageStore<DB> {
    /// Create a new SQL message store with the given pool.
    ///
    /// Call `init` before use unless the schema is known to exist.
    pub fn new(pool: DB::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &DB::Pool {
        &self.pool
    }
}

/// Macro to implement MessageStore for a specific SQL backend.
///
/// This eliminates duplication between PostgreSQL and SQLite implementations
/// while maintaining full type safety.
macro_rules! impl_message_store {
    ($db_type:ty, $row_type:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlMessageStore<$db_type> {
            /// Create the messages table and indexes if they do not exist.
            pub async fn init(&self) -> crate::storage::Result<()> {
                for statement in <$db_type as SqlDatabase>::SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                tracing::info!(
                    backend = <$db_type as SqlDatabase>::NAME,
                    "Message store initialized"
                );
                Ok(())
            }

            fn select_messages() -> sea_query::SelectStatement {
                use crate::storage::schema::Messages;

                sea_query::Query::select()
                    .columns([
                        Messages::Id,
                        Messages::Topic,
                        Messages::Payload,
                        Messages::Timestamp,
                        Messages::Processed,
                    ])
                    .from(Messages::Table)
                    .to_owned()
            }

            fn decode_rows(
                rows: Vec<$row_type>,
            ) -> crate::storage::Result<Vec<crate::storage::StoredMessage>> {
                use sqlx::Row;

                rows.into_iter()
                    .map(|row| {
                        let micros: i64 = row.try_get("timestamp")?;
                        Ok(crate::storage::StoredMessage {
                            id: row.try_get("id")?,
                            topic: row.try_get("topic")?,
                            payload: row.try_get("payload")?,
                            timestamp: crate::storage::helpers::from_micros(micros)?,
                            processed: row.try_get("processed")?,
                        })
                    })
                    .collect()
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::MessageStore for SqlMessageStore<$db_type> {
            async fn insert(
                &self,
                topic: &str,
                payload: &str,
                timestamp: chrono::DateTime<chrono::Utc>,
            ) -> crate::storage::Result<i64> {
                use sea_query::Query;
                use sqlx::Row;

                use crate::storage::schema::Messages;

                let stmt = Query::insert()
                    .into_table(Messages::Table)
                    .columns([
                        Messages::Topic,
                        Messages::Payload,
                        Messages::Timestamp,
                        Messages::Processed,
                    ])
                    .values_panic([
                        topic.into(),
                        payload.into(),
                        crate::storage::helpers::to_micros(timestamp).into(),
                        false.into(),
                    ])
                    .returning_col(Messages::Id)
                    .to_owned();

                let sql = <$db_type>::build_insert(stmt);
                let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
                let id: i64 = row.try_get(0)?;

                tracing::debug!(id, topic, "Message inserted");
                Ok(id)
            }

            async fn fetch_unprocessed(
                &self,
                limit: u32,
            ) -> crate::storage::Result<Vec<crate::storage::StoredMessage>> {
                use sea_query::{ConditionalStatement, Expr, Order};

                use crate::storage::schema::Messages;

                let stmt = Self::select_messages()
                    .and_where(Expr::col(Messages::Processed).eq(false))
                    .order_by(Messages::Timestamp, Order::Asc)
                    .order_by(Messages::Id, Order::Asc)
                    .limit(u64::from(limit))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
                Self::decode_rows(rows)
            }

            async fn fetch(
                &self,
                filter: &crate::storage::MessageFilter,
            ) -> crate::storage::Result<Vec<crate::storage::StoredMessage>> {
                use sea_query::{Cond, ConditionalStatement, Expr, Order};

                use crate::storage::helpers::to_micros;
                use crate::storage::schema::Messages;

                // Rows older than the cursor: earlier timestamp, or same timestamp and lower id.
                let after_cursor = filter.before.map(|cursor| {
                    let timestamp = to_micros(cursor.timestamp);
                    Cond::any()
                        .add(Expr::col(Messages::Timestamp).lt(timestamp))
                        .add(
                            Cond::all()
                                .add(Expr::col(Messages::Timestamp).eq(timestamp))
                                .add(Expr::col(Messages::Id).lt(cursor.id)),
                        )
                });
                let condition = Cond::all()
                    .add_option(
                        filter
                            .start
                            .map(|start| Expr::col(Messages::Timestamp).gte(to_micros(start))),
                    )
                    .add_option(
                        filter
                            .end
                            .map(|end| Expr::col(Messages::Timestamp).lte(to_micros(end))),
                    )
                    .add_option(after_cursor);

                let stmt = Self::select_messages()
                    .cond_where(condition)
                    .order_by(Messages::Timestamp, Order::Desc)
                    .order_by(Messages::Id, Order::Desc)
                    .limit(u64::from(filter.limit))
                    .to_owned();

                let sql = <$db_type>::build_select(stmt);
                let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
                Self::decode_rows(rows)
            }

            async fn mark_processed(&self, id: i64) -> crate::storage::Result<bool> {
                use sea_query::{ConditionalStatement, Expr, Query};

                use crate::storage::schema::Messages;

                // The processed guard makes the update a no-op for repeat calls.
                let stmt = Query::update()
                    .table(Messages::Table)
                    .value(Messages::Processed, true)
                    .and_where(Expr::col(Messages::Id).eq(id))
                    .and_where(Expr::col(Messages::Processed).eq(false))
                    .to_owned();

                let sql = <$db_type>::build_update(stmt);
                let result = sqlx::query(&sql).execute(&self.pool).await?;
                Ok(result.rows_affected() == 1)
            }

            async fn health_check(&self) -> bool {
                match sqlx::query("SELECT 1").execute(&self.pool).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(
                            backend = <$db_type as SqlDatabase>::NAME,
                            error = %e,
                            "Store health check failed"
                        );
                        false
                    }
                }
            }

            async fn close(&self) {
                self.pool.close().await;
                tracing::info!(
                    backend = <$db_type as SqlDatabase>::NAME,
                    "Message store closed"
                );
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_message_store!(super::postgres::Postgres, sqlx::postgres::PgRow, "postgres");
impl_message_store!(super::sqlite::Sqlite, sqlx::sqlite::SqliteRow, "sqlite");
