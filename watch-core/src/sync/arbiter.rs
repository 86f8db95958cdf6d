//! Authority Arbitration
//!
//! Decides whose play/pause/seek proposal becomes the room's canonical
//! state. The broker runs the authoritative instance; every client keeps a
//! mirror fed from received snapshots so it can tag local actions.

use std::time::Instant;
use tracing::debug;

use super::protocol::{PlayPauseProposal, WatcherId};
use super::state::CanonicalState;

/// What a watcher's next proposal would amount to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The watcher holds the remote control
    Initiator,
    /// Nobody holds it; the next proposal claims it
    Unclaimed,
    /// Someone else holds it; the proposal is only a preview
    Advisory { initiator: WatcherId },
}

/// Outcome of arbitrating one proposal
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted {
        state: CanonicalState,
        became_initiator: bool,
    },
    /// Not written; the current initiator keeps control
    Advisory { initiator: WatcherId },
}

/// Holds one room's canonical state and its single initiator
#[derive(Debug, Clone)]
pub struct Arbiter {
    state: CanonicalState,
    /// When `state.timestamp` was last written
    anchored_at: Option<Instant>,
    /// Highest seq adopted from a snapshot (mirror side only)
    adopted_seq: Option<u64>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    pub fn new() -> Self {
        Self {
            state: CanonicalState::default(),
            anchored_at: None,
            adopted_seq: None,
        }
    }

    /// Current canonical state, as last written
    pub fn state(&self) -> &CanonicalState {
        &self.state
    }

    pub fn initiator(&self) -> Option<WatcherId> {
        self.state.initiator_id
    }

    /// Canonical state with the position advanced to `now` while playing
    pub fn snapshot(&self, now: Instant) -> CanonicalState {
        let mut snapshot = self.state.clone();
        snapshot.timestamp = self.position_at(now);
        snapshot
    }

    fn position_at(&self, now: Instant) -> f64 {
        match self.anchored_at {
            Some(anchor) if self.state.playing => {
                self.state.timestamp + now.saturating_duration_since(anchor).as_secs_f64()
            }
            _ => self.state.timestamp,
        }
    }

    pub fn authority_for(&self, watcher: WatcherId) -> Authority {
        match self.state.initiator_id {
            None => Authority::Unclaimed,
            Some(initiator) if initiator == watcher => Authority::Initiator,
            Some(initiator) => Authority::Advisory { initiator },
        }
    }

    /// Arbitrate a proposal in arrival order
    ///
    /// With no initiator the sender claims the role; afterwards only the
    /// initiator's proposals are written.
    pub fn propose(&mut self, from: WatcherId, proposal: &PlayPauseProposal, now: Instant) -> Verdict {
        let became_initiator = match self.authority_for(from) {
            Authority::Advisory { initiator } => {
                debug!(watcher = %from, initiator = %initiator, "Proposal is advisory");
                return Verdict::Advisory { initiator };
            }
            Authority::Unclaimed => true,
            Authority::Initiator => false,
        };

        let timestamp = if proposal.has_position() {
            proposal.timestamp
        } else {
            self.position_at(now)
        };

        self.state = CanonicalState {
            episode_id: proposal.episode_id.or(self.state.episode_id),
            timestamp,
            playing: proposal.playing,
            initiator_id: Some(from),
            seq: self.state.seq + 1,
        };
        self.anchored_at = Some(now);

        if became_initiator {
            debug!(watcher = %from, "Watcher claimed the initiator role");
        }

        Verdict::Accepted {
            state: self.state.clone(),
            became_initiator,
        }
    }

    /// Release the initiator role if `who` holds it
    ///
    /// The position is frozen at `now` so the next claimant starts from where
    /// playback actually is. Returns true if the role was released.
    pub fn release(&mut self, who: WatcherId, now: Instant) -> bool {
        if self.state.initiator_id != Some(who) {
            return false;
        }

        self.state.timestamp = self.position_at(now);
        self.state.initiator_id = None;
        self.state.seq += 1;
        self.anchored_at = Some(now);

        debug!(watcher = %who, "Initiator role released");
        true
    }

    /// Mirror a snapshot received from the broker
    ///
    /// Snapshots older than the newest one already adopted are dropped.
    pub fn adopt(&mut self, snapshot: CanonicalState, now: Instant) -> bool {
        if let Some(floor) = self.adopted_seq {
            if snapshot.seq < floor {
                debug!(seq = snapshot.seq, floor, "Dropping out-of-order snapshot");
                return false;
            }
        }

        self.adopted_seq = Some(snapshot.seq);
        self.state = snapshot;
        self.anchored_at = Some(now);
        true
    }

    /// Forget everything, as after a reconnect
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
