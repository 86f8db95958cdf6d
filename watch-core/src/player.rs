//! Player Seam
//!
//! The session drives the local video player only through this trait, so the
//! surrounding application can plug in whatever player it embeds.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::sync::EpisodeId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// Media is not loaded far enough to act on (retry later)
    #[error("Player not ready")]
    NotReady,

    #[error("Player error: {0}")]
    Failed(String),
}

/// Local video player controlled by the session
pub trait Player: Send + 'static {
    /// Current position in seconds
    fn position(&self) -> Result<f64, PlayerError>;

    fn is_playing(&self) -> bool;

    /// Episode currently loaded, if any
    fn episode(&self) -> Option<EpisodeId>;

    /// Length of the loaded episode in seconds, if known
    fn duration(&self) -> Option<f64>;

    fn seek(&mut self, to: f64) -> Result<(), PlayerError>;

    fn set_playing(&mut self, playing: bool) -> Result<(), PlayerError>;

    fn load_episode(&mut self, episode: EpisodeId) -> Result<(), PlayerError>;
}

#[derive(Debug)]
struct SimulatedInner {
    episode: Option<EpisodeId>,
    duration: Option<f64>,
    position: f64,
    anchored_at: Instant,
    playing: bool,
    ready: bool,
    seeks: Vec<f64>,
}

impl SimulatedInner {
    fn position_now(&self) -> f64 {
        let mut position = self.position;
        if self.playing {
            position += self.anchored_at.elapsed().as_secs_f64();
        }
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn anchor(&mut self, position: f64) {
        self.position = position;
        self.anchored_at = Instant::now();
    }
}

/// A headless player whose clock advances in real time while playing
///
/// Clones share the same underlying player, so one clone can be handed to a
/// session while another observes it. Used by bots and tests.
#[derive(Debug, Clone)]
pub struct SimulatedPlayer {
    inner: Arc<Mutex<SimulatedInner>>,
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlayer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatedInner {
                episode: None,
                duration: None,
                position: 0.0,
                anchored_at: Instant::now(),
                playing: false,
                ready: true,
                seeks: Vec::new(),
            })),
        }
    }

    /// Set the length reported for loaded episodes
    pub fn with_duration(self, duration: f64) -> Self {
        self.inner.lock().duration = Some(duration);
        self
    }

    /// Toggle whether the player accepts commands (false = still buffering)
    pub fn set_ready(&self, ready: bool) {
        self.inner.lock().ready = ready;
    }

    /// Move the playhead directly, as a user scrubbing locally would
    pub fn set_position(&self, position: f64) {
        self.inner.lock().anchor(position);
    }

    /// Positions of every seek issued through the [`Player`] trait
    pub fn seeks(&self) -> Vec<f64> {
        self.inner.lock().seeks.clone()
    }

    pub fn seek_count(&self) -> usize {
        self.inner.lock().seeks.len()
    }
}

impl Player for SimulatedPlayer {
    fn position(&self) -> Result<f64, PlayerError> {
        Ok(self.inner.lock().position_now())
    }

    fn is_playing(&self) -> bool {
        self.inner.lock().playing
    }

    fn episode(&self) -> Option<EpisodeId> {
        self.inner.lock().episode
    }

    fn duration(&self) -> Option<f64> {
        let inner = self.inner.lock();
        inner.episode.and(inner.duration)
    }

    fn seek(&mut self, to: f64) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if !inner.ready {
            return Err(PlayerError::NotReady);
        }
        inner.anchor(to.max(0.0));
        inner.seeks.push(to);
        Ok(())
    }

    fn set_playing(&mut self, playing: bool) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if !inner.ready {
            return Err(PlayerError::NotReady);
        }
        let position = inner.position_now();
        inner.anchor(position);
        inner.playing = playing;
        Ok(())
    }

    fn load_episode(&mut self, episode: EpisodeId) -> Result<(), PlayerError> {
        let mut inner = self.inner.lock();
        if !inner.ready {
            return Err(PlayerError::NotReady);
        }
        inner.episode = Some(episode);
        inner.playing = false;
        inner.anchor(0.0);
        Ok(())
    }
}
