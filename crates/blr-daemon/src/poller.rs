//! Change-detection poller.
//!
//! # Invariants
//!
//! - An entry is emitted iff its timestamp is strictly greater than the
//!   session watermark; emitting advances the watermark to that timestamp.
//! - Equal timestamps are never re-emitted, even when the payload differs.
//! - The watermark never moves backwards.
//! - A store failure is reported to the connection as an error payload and
//!   the loop carries on with the next tick.
//!
//! [`evaluate`] is pure; [`run_poller`] is the per-session task that owns the
//! ticking and the store query.

use std::sync::Arc;
use std::time::Duration;

use blr_db::{LogEntry, LogStore, LogTable, StoreError};
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::api_types::PushMessage;
use crate::error::RelayError;
use crate::session::{Outbound, SessionShared};

/// Error text pushed to the client when the store query fails.
pub const STORE_ERROR_MESSAGE: &str = "internal error fetching log";

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Highest entry timestamp already emitted to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Epoch zero: every stored entry is newer.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn at(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    /// Parse a connection's `since` hint. Accepts RFC 3339 or integer epoch
    /// milliseconds; anything else yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self(ts.with_timezone(&Utc)));
        }
        raw.parse::<i64>()
            .ok()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Self)
    }

    pub fn get(&self) -> DateTime<Utc> {
        self.0
    }

    /// Advance past `entry` if it is strictly newer. Returns whether it was.
    pub fn advance(&mut self, entry: &LogEntry) -> bool {
        if entry.timestamp > self.0 {
            self.0 = entry.timestamp;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Poll evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A newer entry was observed; the watermark now equals its timestamp.
    Emit(LogEntry),
    /// No entry, or nothing newer than the watermark.
    Idle,
    /// The query failed. Watermark untouched.
    Failed(RelayError),
}

impl PollOutcome {
    /// Frame to push to the connection, if any.
    pub fn to_push(&self) -> Option<PushMessage> {
        match self {
            PollOutcome::Emit(entry) => Some(PushMessage::Entry {
                payload: entry.payload.clone(),
                timestamp: entry.timestamp,
            }),
            PollOutcome::Idle => None,
            PollOutcome::Failed(_) => Some(PushMessage::error(STORE_ERROR_MESSAGE)),
        }
    }
}

/// Decide what one poll tick produces given the store's answer.
pub fn evaluate(
    latest: Result<Option<LogEntry>, StoreError>,
    watermark: &mut Watermark,
) -> PollOutcome {
    match latest {
        Err(err) => PollOutcome::Failed(RelayError::StoreUnavailable(err)),
        Ok(None) => PollOutcome::Idle,
        Ok(Some(entry)) => {
            if watermark.advance(&entry) {
                PollOutcome::Emit(entry)
            } else {
                PollOutcome::Idle
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poll task
// ---------------------------------------------------------------------------

/// Run one poll tick for `session`: query, evaluate, push.
///
/// The watermark lock is taken only after the query returns, so a slow
/// store stalls this session alone.
pub(crate) async fn poll_tick(session: &SessionShared, store: &dyn LogStore) -> PollOutcome {
    let latest = store.most_recent(LogTable::Bot, session.key()).await;

    if session.is_closed() {
        return PollOutcome::Idle;
    }

    let outcome = {
        let mut wm = session.watermark.lock();
        evaluate(latest, &mut wm)
    };

    match &outcome {
        PollOutcome::Emit(entry) => {
            debug!(session_id = %session.id(), key = session.key(), ts = %entry.timestamp, "emit");
        }
        PollOutcome::Failed(err) => {
            warn!(session_id = %session.id(), key = session.key(), error = %err, "poll failed");
        }
        PollOutcome::Idle => {}
    }

    if let Some(msg) = outcome.to_push() {
        session.send(Outbound::Push(msg));
    }

    outcome
}

/// Poll loop for one session. Runs until the session is closed or the task
/// is aborted. The first tick fires immediately.
pub(crate) async fn run_poller(
    session: Arc<SessionShared>,
    store: Arc<dyn LogStore>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if session.is_closed() {
            break;
        }
        poll_tick(&session, store.as_ref()).await;
    }
}
