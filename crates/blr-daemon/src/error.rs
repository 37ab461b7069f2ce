//! Relay error taxonomy.

use blr_db::StoreError;

use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Connection opened without a `key`. Fatal to establishment: the caller
    /// sends one error payload and closes without registering a session.
    #[error("query parameter 'key' is required")]
    MissingKey,

    /// Recoverable. Reported inline to the connection; polling continues.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The connection left a liveness probe unanswered for a full heartbeat
    /// interval and was forcibly closed.
    #[error("session {0} failed liveness check")]
    LivenessTimeout(SessionId),
}
