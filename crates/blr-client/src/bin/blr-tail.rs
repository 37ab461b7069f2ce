//! blr-tail: print a key's bot-log feed to stdout, reconnecting as needed.

use std::time::Duration;

use anyhow::Result;
use blr_client::{ClientConfig, FeedClient, FeedEvent};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "blr-tail")]
#[command(about = "Tail the bot-log stream for one key", long_about = None)]
struct Cli {
    /// Stream endpoint
    #[arg(long, default_value = "ws://127.0.0.1:5148/v1/stream")]
    url: String,

    /// Key (user id) whose feed to follow
    #[arg(long)]
    key: String,

    /// Reconnect backoff in milliseconds
    #[arg(long, default_value_t = 2000)]
    backoff_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(cli.url);
    config.backoff = Duration::from_millis(cli.backoff_ms);

    let mut client = FeedClient::new(config);
    let mut events = client.connect(&cli.key).await?;

    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Some(FeedEvent::Entry { payload, timestamp }) => {
                    let ts = timestamp.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string());
                    println!("{ts} {payload}");
                }
                Some(FeedEvent::ServerError(msg)) => warn!(error = %msg, "server error"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("closing feed");
                break;
            }
        }
    }

    client.close().await;
    Ok(())
}
