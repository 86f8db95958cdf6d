//! Session configuration, events and errors

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::network::{
    ConnectionError, TransportConfig, TransportError, DEFAULT_LIVENESS_INTERVAL, DEFAULT_STALE_AFTER,
};
use crate::player::PlayerError;
use crate::sync::{
    Authority, CanonicalState, EpisodeId, JoinPayload, PlayPauseProposal, RoomId, WatcherId,
    WatcherState, DEFAULT_DRIFT_THRESHOLD,
};

/// Default interval for re-broadcasting our watcher state
pub const DEFAULT_REBROADCAST_INTERVAL: Duration = Duration::from_millis(1500);

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything needed to join one room
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base websocket URL of the broker, e.g. `ws://127.0.0.1:8080`
    pub broker_url: String,
    pub room: RoomId,
    /// Who we are in the room
    pub identity: JoinPayload,
    pub rebroadcast_interval: Duration,
    pub liveness_interval: Duration,
    pub stale_after: Duration,
    /// Drift (seconds) tolerated before the local player is forced
    pub drift_threshold: f64,
}

impl SessionConfig {
    pub fn new(broker_url: impl Into<String>, room: RoomId, identity: JoinPayload) -> Self {
        Self {
            broker_url: broker_url.into(),
            room,
            identity,
            rebroadcast_interval: DEFAULT_REBROADCAST_INTERVAL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
        }
    }

    pub fn with_rebroadcast_interval(mut self, interval: Duration) -> Self {
        self.rebroadcast_interval = interval;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_drift_threshold(mut self, threshold: f64) -> Self {
        self.drift_threshold = threshold;
        self
    }

    /// Websocket URL of this room on the broker
    pub fn room_url(&self) -> String {
        format!("{}/room/ws/{}", self.broker_url.trim_end_matches('/'), self.room)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig::new(self.room_url())
            .with_liveness_interval(self.liveness_interval)
            .with_stale_after(self.stale_after)
    }
}

/// Events emitted by a running session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Link to the broker is up and we (re)joined the room
    Connected,
    /// Link dropped; reconnection is automatic
    Disconnected(ConnectionError),
    WatcherJoined(WatcherState),
    WatcherUpdated(WatcherState),
    WatcherLeft(WatcherId),
    /// A newer canonical snapshot was adopted
    CanonicalChanged(CanonicalState),
    /// The local player was forced onto the canonical timeline
    Corrected { seek_to: f64, playing: bool },
    /// The local player could not be corrected yet; will retry
    CorrectionDeferred(PlayerError),
    /// A local control action went out, tagged with our authority at the time
    ProposalSent {
        proposal: PlayPauseProposal,
        authority: Authority,
    },
    /// We left the room on request; the session is over
    Left,
}

/// Commands sent to the session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Propose(PlayPauseProposal),
    /// Seek while keeping the local play state
    Seek(f64),
    SelectEpisode(EpisodeId),
    Leave { done: oneshot::Sender<()> },
    Shutdown,
}
