//! Watch Broker
//!
//! Hosts watch-together rooms over websockets. Each room keeps one
//! authoritative arbiter; the broker fans canonical snapshots and watcher
//! states out to every member.

pub mod config;
pub mod dashboard;
pub mod metrics;
pub mod network;
pub mod rooms;

use std::net::SocketAddr;

use thiserror::Error;

pub use config::BrokerConfig;
pub use metrics::{Metrics, SharedMetrics};
pub use network::{router, AppState, Broker};
pub use rooms::RoomRegistry;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Invalid {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
