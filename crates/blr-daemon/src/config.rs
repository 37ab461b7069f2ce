//! Daemon configuration resolved from the process environment.
//!
//! | Variable                    | Default          |
//! |-----------------------------|------------------|
//! | `BLR_DAEMON_ADDR`           | `127.0.0.1:5148` |
//! | `BLR_DATABASE_URL`          | unset: in-memory store |
//! | `BLR_POLL_INTERVAL_MS`      | `1000`           |
//! | `BLR_HEARTBEAT_INTERVAL_MS` | `30000`          |

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const ENV_DAEMON_ADDR: &str = "BLR_DAEMON_ADDR";
pub const ENV_POLL_INTERVAL_MS: &str = "BLR_POLL_INTERVAL_MS";
pub const ENV_HEARTBEAT_INTERVAL_MS: &str = "BLR_HEARTBEAT_INTERVAL_MS";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL. `None` runs the relay on the in-memory store.
    pub database_url: Option<String>,
    /// Change-detection poll period per session.
    pub poll_interval: Duration,
    /// Liveness sweep period for the whole endpoint.
    pub heartbeat_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5148)),
            database_url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve config through an arbitrary variable lookup. Unset or blank
    /// variables fall back to defaults; set but unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(addr) = get(ENV_DAEMON_ADDR) {
            cfg.bind_addr = addr
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_DAEMON_ADDR}: {addr}"))?;
        }

        cfg.database_url = get(blr_db::ENV_DB_URL);

        if let Some(ms) = get(ENV_POLL_INTERVAL_MS) {
            cfg.poll_interval = parse_interval_ms(ENV_POLL_INTERVAL_MS, &ms)?;
        }
        if let Some(ms) = get(ENV_HEARTBEAT_INTERVAL_MS) {
            cfg.heartbeat_interval = parse_interval_ms(ENV_HEARTBEAT_INTERVAL_MS, &ms)?;
        }

        Ok(cfg)
    }
}

fn parse_interval_ms(name: &str, raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid {name}: {raw}"))?;
    if ms == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(Duration::from_millis(ms))
}
