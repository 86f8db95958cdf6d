//! Drift Reconciliation
//!
//! Brings the local player onto the canonical timeline whenever a snapshot
//! arrives, without micro-seeking over normal clock skew.

use std::time::Instant;
use tracing::{debug, info, warn};

use super::state::CanonicalState;
use crate::player::{Player, PlayerError};

/// Drift (seconds) tolerated before forcing a seek
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 2.0;

/// What reconciling one snapshot did to the local player
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Already within threshold with matching play state
    InSync,
    /// Player was forced onto the canonical timeline
    Corrected { seek_to: f64, playing: bool },
    /// Player could not be driven; the snapshot is kept and retried
    Deferred(PlayerError),
}

/// A snapshot that could not be applied yet, and when it arrived
#[derive(Debug, Clone)]
struct Pending {
    canonical: CanonicalState,
    received_at: Instant,
}

impl Pending {
    /// The snapshot as it stands at `now`, advanced while playing
    fn at(&self, now: Instant) -> CanonicalState {
        let mut canonical = self.canonical.clone();
        if canonical.playing {
            canonical.timestamp += now.saturating_duration_since(self.received_at).as_secs_f64();
        }
        canonical
    }
}

/// Applies canonical snapshots to a local player
#[derive(Debug, Clone)]
pub struct Reconciler {
    threshold: f64,
    /// Newest snapshot that could not be applied yet
    pending: Option<Pending>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_THRESHOLD)
    }
}

impl Reconciler {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            pending: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any deferred snapshot
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Reconcile the player against a freshly received snapshot
    ///
    /// Replaces any snapshot still waiting from an earlier deferral.
    pub fn apply<P: Player + ?Sized>(&mut self, canonical: &CanonicalState, player: &mut P) -> Correction {
        self.apply_at(canonical, player, Instant::now())
    }

    fn apply_at<P: Player + ?Sized>(
        &mut self,
        canonical: &CanonicalState,
        player: &mut P,
        received_at: Instant,
    ) -> Correction {
        self.pending = None;
        let correction = self.reconcile(canonical, player);
        if matches!(correction, Correction::Deferred(_)) {
            self.pending = Some(Pending {
                canonical: canonical.clone(),
                received_at,
            });
        }
        correction
    }

    /// Try the deferred snapshot again, if there is one
    ///
    /// A playing snapshot is advanced by the time spent waiting, so the
    /// player lands where the room is now rather than where it was.
    pub fn retry_pending<P: Player + ?Sized>(&mut self, player: &mut P) -> Option<Correction> {
        self.retry_pending_at(player, Instant::now())
    }

    fn retry_pending_at<P: Player + ?Sized>(&mut self, player: &mut P, now: Instant) -> Option<Correction> {
        let pending = self.pending.take()?;
        let canonical = pending.at(now);
        debug!(seq = canonical.seq, at = canonical.timestamp, "Retrying deferred correction");

        let correction = self.reconcile(&canonical, player);
        if matches!(correction, Correction::Deferred(_)) {
            self.pending = Some(pending);
        }
        Some(correction)
    }

    fn reconcile<P: Player + ?Sized>(&self, canonical: &CanonicalState, player: &mut P) -> Correction {
        match self.try_reconcile(canonical, player) {
            Ok(correction) => correction,
            Err(e) => {
                warn!("Deferring correction to {:.2}s: {}", canonical.timestamp, e);
                Correction::Deferred(e)
            }
        }
    }

    fn try_reconcile<P: Player + ?Sized>(
        &self,
        canonical: &CanonicalState,
        player: &mut P,
    ) -> Result<Correction, PlayerError> {
        let mut force = false;

        if let Some(episode) = canonical.episode_id {
            if player.episode() != Some(episode) {
                info!("Loading episode {} to follow the room", episode);
                player.load_episode(episode)?;
                force = true;
            }
        }

        let local = player.position()?;
        let drift = (local - canonical.timestamp).abs();
        let playing_mismatch = player.is_playing() != canonical.playing;

        if !force && drift <= self.threshold && !playing_mismatch {
            return Ok(Correction::InSync);
        }

        debug!(
            local,
            canonical = canonical.timestamp,
            drift,
            playing = canonical.playing,
            "Correcting local player"
        );
        player.seek(canonical.timestamp)?;
        player.set_playing(canonical.playing)?;

        Ok(Correction::Corrected {
            seek_to: canonical.timestamp,
            playing: canonical.playing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::SimulatedPlayer;
    use std::time::Duration;

    fn canonical(timestamp: f64, playing: bool) -> CanonicalState {
        CanonicalState {
            timestamp,
            playing,
            ..CanonicalState::default()
        }
    }

    fn paused_at(position: f64) -> SimulatedPlayer {
        let player = SimulatedPlayer::new();
        player.set_position(position);
        player
    }

    #[test]
    fn test_drift_within_threshold_is_left_alone() {
        let mut player = paused_at(10.0);
        let mut reconciler = Reconciler::default();

        assert_eq!(reconciler.apply(&canonical(11.9, false), &mut player), Correction::InSync);
        assert_eq!(player.seek_count(), 0);
    }

    #[test]
    fn test_drift_beyond_threshold_forces_seek() {
        let mut player = paused_at(10.0);
        let mut reconciler = Reconciler::default();

        assert_eq!(
            reconciler.apply(&canonical(12.1, false), &mut player),
            Correction::Corrected {
                seek_to: 12.1,
                playing: false
            }
        );
        assert_eq!(player.seeks(), vec![12.1]);
    }

    #[test]
    fn test_play_state_mismatch_forces_correction() {
        let mut player = paused_at(30.0);
        let mut reconciler = Reconciler::default();

        let correction = reconciler.apply(&canonical(30.5, true), &mut player);
        assert_eq!(
            correction,
            Correction::Corrected {
                seek_to: 30.5,
                playing: true
            }
        );
        assert!(player.is_playing());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut player = paused_at(100.0);
        player.set_playing(true).unwrap();
        let mut reconciler = Reconciler::default();
        let snapshot = canonical(100.0, true);

        assert_eq!(reconciler.apply(&snapshot, &mut player), Correction::InSync);
        assert_eq!(reconciler.apply(&snapshot, &mut player), Correction::InSync);
        assert_eq!(player.seek_count(), 0);
    }

    #[test]
    fn test_converged_snapshot_is_not_reapplied() {
        let mut player = paused_at(0.0);
        let mut reconciler = Reconciler::default();
        let snapshot = canonical(200.0, false);

        assert!(matches!(reconciler.apply(&snapshot, &mut player), Correction::Corrected { .. }));
        assert_eq!(reconciler.apply(&snapshot, &mut player), Correction::InSync);
        assert_eq!(player.seek_count(), 1);
    }

    #[test]
    fn test_episode_change_loads_then_seeks() {
        let mut player = paused_at(5.0);
        let mut reconciler = Reconciler::default();
        let snapshot = CanonicalState {
            episode_id: Some(9),
            ..canonical(4.0, false)
        };

        // Close enough in time, but the wrong episode
        let correction = reconciler.apply(&snapshot, &mut player);
        assert!(matches!(correction, Correction::Corrected { seek_to, .. } if seek_to == 4.0));
        assert_eq!(player.episode(), Some(9));
    }

    #[test]
    fn test_deferred_until_player_ready() {
        let mut player = paused_at(0.0);
        player.set_ready(false);
        let mut reconciler = Reconciler::default();

        let correction = reconciler.apply(&canonical(60.0, true), &mut player);
        assert_eq!(correction, Correction::Deferred(PlayerError::NotReady));
        assert!(reconciler.has_pending());

        // Still not ready: stays pending
        assert!(matches!(reconciler.retry_pending(&mut player), Some(Correction::Deferred(_))));
        assert!(reconciler.has_pending());

        player.set_ready(true);
        assert!(matches!(
            reconciler.retry_pending(&mut player),
            Some(Correction::Corrected { .. })
        ));
        assert!(!reconciler.has_pending());
        assert_eq!(reconciler.retry_pending(&mut player), None);
    }

    #[test]
    fn test_retry_advances_playing_snapshot() {
        let mut player = paused_at(0.0);
        player.set_ready(false);
        let mut reconciler = Reconciler::default();
        let received_at = Instant::now();

        let correction = reconciler.apply_at(&canonical(60.0, true), &mut player, received_at);
        assert_eq!(correction, Correction::Deferred(PlayerError::NotReady));

        // Still waiting after a while: the original receipt time is kept
        let later = received_at + Duration::from_secs(2);
        assert!(matches!(reconciler.retry_pending_at(&mut player, later), Some(Correction::Deferred(_))));

        player.set_ready(true);
        let ready_at = received_at + Duration::from_secs(4);
        assert_eq!(
            reconciler.retry_pending_at(&mut player, ready_at),
            Some(Correction::Corrected {
                seek_to: 64.0,
                playing: true
            })
        );
        assert_eq!(player.seeks(), vec![64.0]);
    }

    #[test]
    fn test_retry_keeps_paused_position() {
        let mut player = paused_at(0.0);
        player.set_ready(false);
        let mut reconciler = Reconciler::default();
        let received_at = Instant::now();

        reconciler.apply_at(&canonical(60.0, false), &mut player, received_at);
        player.set_ready(true);
        let correction = reconciler.retry_pending_at(&mut player, received_at + Duration::from_secs(10));
        assert_eq!(
            correction,
            Some(Correction::Corrected {
                seek_to: 60.0,
                playing: false
            })
        );
    }

    #[test]
    fn test_newer_snapshot_replaces_pending() {
        let mut player = paused_at(0.0);
        player.set_ready(false);
        let mut reconciler = Reconciler::default();

        reconciler.apply(&canonical(60.0, true), &mut player);
        player.set_ready(true);
        // In sync with the newer snapshot, so the stale one is gone
        assert_eq!(reconciler.apply(&canonical(0.5, false), &mut player), Correction::InSync);
        assert!(!reconciler.has_pending());
    }
}
