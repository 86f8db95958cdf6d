//! Transport event and command handlers

use std::time::Instant;
use tracing::{debug, info, warn};

use crate::network::TransportEvent;
use crate::player::{Player, PlayerError};
use crate::sync::{
    Authority, CanonicalState, Correction, PlayPauseProposal, WatchMessage, WatcherId, WatcherState,
    WatcherStatus,
};

use super::runner::Session;
use super::types::{SessionCommand, SessionEvent};

impl<P: Player> Session<P> {
    /// Handle a transport event
    pub(super) fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!(room = %self.config.room, "Connected to broker, joining room");

                // The room may have been discarded while we were away
                self.arbiter.reset();
                self.reconciler.clear();
                self.view.watchers.clear();
                self.view.canonical = CanonicalState::default();
                self.joined = true;

                self.send(WatchMessage::Join(self.config.identity.clone()));
                let state = self.local_state();
                self.send(WatchMessage::WatcherState(state));

                self.publish();
                self.emit(SessionEvent::Connected);
            }

            TransportEvent::Disconnected(cause) => {
                self.publish();
                if self.joined {
                    warn!(room = %self.config.room, "Disconnected from broker: {}", cause);
                    self.joined = false;
                    self.emit(SessionEvent::Disconnected(cause));
                } else {
                    debug!("Still unable to reach broker: {}", cause);
                }
            }

            TransportEvent::Message(message) => {
                self.handle_message(message);
            }
        }
    }

    /// Handle a message relayed by the broker
    fn handle_message(&mut self, message: WatchMessage) {
        match message {
            WatchMessage::WatcherState(state) => {
                if state.id == self.view.local_id {
                    return;
                }
                let is_new = self.view.upsert_watcher(state.clone());
                self.publish();
                if is_new {
                    info!(watcher = %state.id, "{} joined the room", state.display_name);
                    self.emit(SessionEvent::WatcherJoined(state));
                } else {
                    self.emit(SessionEvent::WatcherUpdated(state));
                }
            }

            WatchMessage::Leave(leave) => {
                self.remove_watcher(leave.watcher_id);
            }

            WatchMessage::CanonicalSnapshot(snapshot) => {
                self.handle_snapshot(snapshot);
            }

            WatchMessage::Join(join) => {
                debug!(watcher = %join.watcher_id, "Ignoring join relayed by broker");
            }

            WatchMessage::PlayPauseProposal(_) | WatchMessage::Heartbeat(_) => {
                debug!("Ignoring unexpected {} message", message.kind());
            }
        }
    }

    fn remove_watcher(&mut self, id: WatcherId) {
        if id == self.view.local_id {
            return;
        }

        // Mirror the broker releasing the initiator role; its snapshot follows
        if self.arbiter.release(id, Instant::now()) {
            self.view.canonical = self.arbiter.state().clone();
        }

        let removed = self.view.remove_watcher(id);
        self.publish();
        if let Some(state) = removed {
            info!(watcher = %id, "{} left the room", state.display_name);
            self.emit(SessionEvent::WatcherLeft(id));
        }
    }

    fn handle_snapshot(&mut self, snapshot: CanonicalState) {
        if !self.arbiter.adopt(snapshot.clone(), Instant::now()) {
            return;
        }

        let changed = self.view.canonical != snapshot;
        self.view.canonical = snapshot.clone();
        let correction = self.reconciler.apply(&snapshot, &mut self.player);
        self.publish();

        if changed {
            self.emit(SessionEvent::CanonicalChanged(snapshot));
        }
        self.report_correction(correction);
    }

    fn report_correction(&mut self, correction: Correction) {
        match correction {
            Correction::InSync => {}
            Correction::Corrected { seek_to, playing } => {
                self.emit(SessionEvent::Corrected { seek_to, playing });
            }
            Correction::Deferred(e) => {
                self.emit(SessionEvent::CorrectionDeferred(e));
            }
        }
    }

    /// Handle a local control command
    pub(super) fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Propose(proposal) => self.propose(proposal),
            SessionCommand::Seek(to) => {
                let playing = self.player.is_playing();
                self.propose(PlayPauseProposal::new(to, playing));
            }
            SessionCommand::SelectEpisode(episode) => {
                let playing = self.player.is_playing();
                self.propose(PlayPauseProposal::new(0.0, playing).with_episode(episode));
            }
            // Handled by the run loop
            SessionCommand::Leave { .. } | SessionCommand::Shutdown => {}
        }
    }

    /// Tag a local proposal with our authority, preview it and send it
    fn propose(&mut self, proposal: PlayPauseProposal) {
        let authority = self.arbiter.authority_for(self.view.local_id);
        if let Authority::Advisory { initiator } = authority {
            debug!(initiator = %initiator, "Proposal is advisory, the initiator keeps control");
        }

        self.preview(&proposal);
        self.send(WatchMessage::PlayPauseProposal(proposal.clone()));
        self.emit(SessionEvent::ProposalSent { proposal, authority });
    }

    /// Apply a local proposal to the player right away
    ///
    /// The next snapshot confirms or overrides it.
    fn preview(&mut self, proposal: &PlayPauseProposal) {
        if let Err(e) = apply_preview(&mut self.player, proposal) {
            debug!("Could not preview proposal locally: {}", e);
        }
    }

    /// Periodic work: retry deferred corrections, refresh our state for peers
    pub(super) fn on_tick(&mut self) {
        let had_pending = self.reconciler.has_pending();
        let correction = self.reconciler.retry_pending(&mut self.player);
        if had_pending != self.reconciler.has_pending() {
            self.publish();
        }
        if let Some(correction) = correction {
            self.report_correction(correction);
        }

        if self.joined {
            let state = self.local_state();
            self.send(WatchMessage::WatcherState(state));
        }
    }

    /// Our advisory state as reported to the room
    pub(super) fn local_state(&self) -> WatcherState {
        let identity = &self.config.identity;
        let position = self.player.position();

        let status = if self.reconciler.has_pending() || position.is_err() {
            WatcherStatus::Buffering
        } else if self.player.episode().is_none() {
            WatcherStatus::Idle
        } else if self.player.is_playing() {
            WatcherStatus::Playing
        } else {
            WatcherStatus::Paused
        };

        let timestamp = position.unwrap_or(self.view.canonical.timestamp);
        let progress = match self.player.duration() {
            Some(duration) if duration > 0.0 => (timestamp / duration).clamp(0.0, 1.0),
            _ => 0.0,
        };

        WatcherState {
            id: identity.watcher_id,
            display_name: identity.display_name.clone(),
            avatar_ref: identity.avatar_ref.clone(),
            timestamp,
            progress,
            status,
        }
    }
}

fn apply_preview<P: Player>(player: &mut P, proposal: &PlayPauseProposal) -> Result<(), PlayerError> {
    if let Some(episode) = proposal.episode_id {
        if player.episode() != Some(episode) {
            player.load_episode(episode)?;
        }
    }
    if proposal.has_position() {
        player.seek(proposal.timestamp)?;
    }
    player.set_playing(proposal.playing)
}
