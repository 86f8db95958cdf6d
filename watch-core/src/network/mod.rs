//! Networking
//!
//! A single websocket to the room broker, plus the broker's HTTP room
//! directory.

mod directory;
mod transport;

pub use directory::{DirectoryError, RoomDirectory, RoomSummary};
pub use transport::{
    ConnectionError, LinkState, Transport, TransportConfig, TransportError, TransportEvent,
    TransportHandle, DEFAULT_LIVENESS_INTERVAL, DEFAULT_STALE_AFTER,
};
