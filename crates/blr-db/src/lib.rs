//! blr-db
//!
//! Log Store Adapter for the bot-log relay.
//!
//! Two query shapes are exposed through [`LogStore`]: "most recent entry for
//! key" and "insert new entry for key". Both run against one of two tables
//! ([`LogTable`]). The Postgres implementation ([`PgLogStore`]) shares one
//! connection pool across every caller; [`MemLogStore`] is a deterministic
//! in-process stand-in used by tests and by the daemon when no database URL
//! is configured.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

mod mem;

pub use mem::MemLogStore;

pub const ENV_DB_URL: &str = "BLR_DATABASE_URL";

/// Connect to Postgres using BLR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Connect to Postgres at `url` with the shared pool settings.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which log table a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTable {
    /// Messages authored by the user.
    User,
    /// Messages authored by the bot. This is the table the relay streams.
    Bot,
}

impl LogTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTable::User => "user_logs",
            LogTable::Bot => "bot_logs",
        }
    }
}

impl fmt::Display for LogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted log row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(payload: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
        }
    }
}

/// Store-level failure. Callers treat every variant as the recoverable
/// "store unavailable" condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, connection refused, TLS).
    #[error("log store unavailable: {0}")]
    Unavailable(String),
    /// The store was reached but the statement failed.
    #[error("log store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// LogStore trait
// ---------------------------------------------------------------------------

/// The two query shapes the relay and the REST endpoints need.
///
/// Implementations must be `Send + Sync` and tolerate concurrent use from
/// many sessions without serialising unrelated keys.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Most recent entry for `key` in `table`, or `None` if the key has no
    /// entries. Ties on timestamp are broken by insertion order, latest wins.
    async fn most_recent(&self, table: LogTable, key: &str) -> Result<Option<LogEntry>, StoreError>;

    /// Append a new entry for `key` in `table`.
    async fn insert(
        &self,
        table: LogTable,
        key: &str,
        payload: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

/// [`LogStore`] backed by the shared Postgres pool.
#[derive(Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for PgLogStore {
    async fn most_recent(&self, table: LogTable, key: &str) -> Result<Option<LogEntry>, StoreError> {
        // Table names cannot be bound; `as_str` only ever yields the two
        // fixed identifiers.
        let sql = format!(
            r#"
            select message, ts_utc
            from {table}
            where user_id = $1
            order by ts_utc desc, log_id desc
            limit 1
            "#,
            table = table.as_str()
        );

        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;

        row.map(|r| -> Result<LogEntry, StoreError> {
            Ok(LogEntry {
                payload: r.try_get("message")?,
                timestamp: r.try_get("ts_utc")?,
            })
        })
        .transpose()
    }

    async fn insert(
        &self,
        table: LogTable,
        key: &str,
        payload: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            insert into {table} (user_id, message, ts_utc)
            values ($1, $2, $3)
            "#,
            table = table.as_str()
        );

        sqlx::query(&sql)
            .bind(key)
            .bind(payload)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
