//! Shared runtime state for blr-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The log store is shared
//! by the REST endpoints and every stream session.

use std::sync::Arc;

use blr_db::LogStore;
use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;
use crate::session::SessionManager;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    /// Static build metadata.
    pub build: BuildInfo,
    /// Log Store Adapter (shared pool).
    pub store: Arc<dyn LogStore>,
    /// Open stream sessions.
    pub sessions: SessionManager,
}

impl AppState {
    pub fn new(store: Arc<dyn LogStore>, config: &RelayConfig) -> Self {
        let sessions = SessionManager::new(Arc::clone(&store), config.poll_interval);
        Self {
            build: BuildInfo {
                service: "blr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            store,
            sessions,
        }
    }
}
