//! Room Session
//!
//! Membership of one watcher in one room. Routes broker traffic into the
//! arbiter mirror and the reconciler, and local controls out to the broker.

mod handle;
mod handlers;
mod runner;
mod types;

pub use handle::SessionHandle;
pub use runner::Session;
pub use types::{SessionConfig, SessionError, SessionEvent, DEFAULT_REBROADCAST_INTERVAL};
