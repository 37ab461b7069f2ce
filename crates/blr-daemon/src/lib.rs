//! blr-daemon library target.
//!
//! Exposes the router, state, and relay components for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod poller;
pub mod relay;
pub mod routes;
pub mod session;
pub mod state;
