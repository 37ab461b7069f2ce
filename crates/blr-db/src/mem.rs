//! Deterministic in-memory [`LogStore`].
//!
//! - Entries are kept per (table, key) in insertion order.
//! - `most_recent` returns the entry with the greatest timestamp; among equal
//!   timestamps the last inserted wins, matching the Postgres ordering
//!   (`ts_utc desc, log_id desc`).
//! - `set_unavailable(true)` makes every call fail with
//!   [`StoreError::Unavailable`] until cleared.
//! - `query_count` counts `most_recent` calls so callers can observe polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{LogEntry, LogStore, LogTable, StoreError};

#[derive(Debug, Default)]
pub struct MemLogStore {
    rows: RwLock<HashMap<(LogTable, String), Vec<LogEntry>>>,
    unavailable: AtomicBool,
    queries: AtomicU64,
}

impl MemLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `most_recent` calls served (including failed ones).
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemLogStore {
    async fn most_recent(&self, table: LogTable, key: &str) -> Result<Option<LogEntry>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let rows = self.rows.read().await;
        let latest = rows.get(&(table, key.to_string())).and_then(|entries| {
            // max_by_key keeps the last maximum, so later inserts win ties.
            entries.iter().max_by_key(|e| e.timestamp).cloned()
        });
        Ok(latest)
    }

    async fn insert(
        &self,
        table: LogTable,
        key: &str,
        payload: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_available()?;

        let mut rows = self.rows.write().await;
        rows.entry((table, key.to_string()))
            .or_default()
            .push(LogEntry::new(payload, timestamp));
        Ok(())
    }
}
