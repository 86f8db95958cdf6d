//! Handle to a running session

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::sync::{EpisodeId, PlayPauseProposal, RoomView, WatcherId};

use super::types::{SessionCommand, SessionError};

/// Controls a running session; dropping it tears the session down
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    view_rx: watch::Receiver<RoomView>,
    local_id: WatcherId,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub(super) fn new(
        command_tx: mpsc::UnboundedSender<SessionCommand>,
        view_rx: watch::Receiver<RoomView>,
        local_id: WatcherId,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            command_tx,
            view_rx,
            local_id,
            task: Some(task),
        }
    }

    fn command(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.command_tx.send(cmd).map_err(|_| SessionError::Closed)
    }

    /// Resume playback from `at` seconds
    pub fn play(&self, at: f64) -> Result<(), SessionError> {
        self.propose(PlayPauseProposal::new(at, true))
    }

    /// Pause playback at `at` seconds
    pub fn pause(&self, at: f64) -> Result<(), SessionError> {
        self.propose(PlayPauseProposal::new(at, false))
    }

    /// Jump to `to` seconds, keeping the current play state
    pub fn seek(&self, to: f64) -> Result<(), SessionError> {
        self.command(SessionCommand::Seek(to))
    }

    /// Switch the room to another episode, from its start
    pub fn select_episode(&self, episode: EpisodeId) -> Result<(), SessionError> {
        self.command(SessionCommand::SelectEpisode(episode))
    }

    /// Send an arbitrary control proposal
    pub fn propose(&self, proposal: PlayPauseProposal) -> Result<(), SessionError> {
        self.command(SessionCommand::Propose(proposal))
    }

    pub fn local_id(&self) -> WatcherId {
        self.local_id
    }

    /// Snapshot of the current room view
    pub fn view(&self) -> RoomView {
        self.view_rx.borrow().clone()
    }

    /// Watch the room view for changes
    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.view_rx.clone()
    }

    /// Check if we currently hold the remote control
    pub fn is_initiator(&self) -> bool {
        self.view_rx.borrow().is_initiator()
    }

    /// Leave the room: announce it, close the link, and wait for teardown
    pub async fn leave(mut self) -> Result<(), SessionError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.command(SessionCommand::Leave { done: done_tx })?;
        done_rx.await.map_err(|_| SessionError::Closed)?;

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.command_tx.send(SessionCommand::Shutdown);
        }
    }
}
