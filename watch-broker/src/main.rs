//! Watch Broker
//!
//! Room broker for watch-together sessions, with a terminal dashboard.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --no-dashboard  # Plain logging mode
//!
//! Configured through BIND_ADDR, PORT, WS_*, JOIN_TIMEOUT_MS and SNAPSHOT_INTERVAL_MS.

use watch_broker::{dashboard, network, BrokerConfig, Metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let use_dashboard = !args.contains(&"--no-dashboard".to_string());

    let config = BrokerConfig::from_env()?;

    // Shared metrics state
    let metrics = Metrics::shared();

    if use_dashboard {
        // Run with TUI dashboard
        dashboard::run(config, metrics).await
    } else {
        // Run with plain logging
        network::run_with_logging(config, metrics).await?;
        Ok(())
    }
}
