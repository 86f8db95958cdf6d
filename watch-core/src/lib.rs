//! Watch Together - Core Library
//!
//! Keeps several viewers' video players on one shared playback timeline.
//! Each viewer runs a [`Session`] against a room broker; the broker
//! arbitrates who controls playback and the session reconciles the local
//! player with the room's canonical state.

pub mod network;
pub mod player;
pub mod session;
pub mod sync;

use std::sync::Once;

// Re-exports for convenience
pub use network::{LinkState, RoomDirectory, Transport, TransportConfig, TransportEvent};
pub use player::{Player, PlayerError, SimulatedPlayer};
pub use session::{Session, SessionConfig, SessionEvent, SessionHandle};
pub use sync::{CanonicalState, RoomId, RoomView, WatchMessage, WatcherId, WatcherState};

static TRACING_INIT: Once = Once::new();

/// Install a stderr `tracing` subscriber for applications embedding the core
///
/// `RUST_LOG` takes precedence; otherwise core logs at debug. Safe to call
/// more than once.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("watch_core=debug"));

        let _ = tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
