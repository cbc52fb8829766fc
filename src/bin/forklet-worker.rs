//! Worker entry point.
//!
//! Handshakes on stdout, then serves requests from stdin until `DONE` or the
//! watchdog fires. Stderr carries diagnostics only and is not part of the
//! protocol. The watchdog timeout comes from the first positional argument
//! (milliseconds) or `FORKLET_WATCHDOG_MS`, falling back to the default.

use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use forklet::worker::{WorkerConfig, run_worker};
use forklet::StatEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = WorkerConfig::from_env();
    if let Some(arg) = std::env::args().nth(1) {
        let millis: u64 = arg
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid watchdog timeout: {arg}"))?;
        config.watchdog_timeout = Duration::from_millis(millis);
    }

    run_worker(StatEngine, config).await?;
    Ok(())
}
