//! Sync Engine
//!
//! Wire protocol, room state, authority arbitration and drift
//! reconciliation. Nothing in here touches the network.

mod arbiter;
mod protocol;
mod reconcile;
mod room_id;
mod state;

pub use arbiter::{Arbiter, Authority, Verdict};
pub use protocol::*;
pub use reconcile::{Correction, Reconciler, DEFAULT_DRIFT_THRESHOLD};
pub use room_id::{InvalidRoomId, RoomId};
pub use state::*;
