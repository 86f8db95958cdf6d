//! Room State Management

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::protocol::{EpisodeId, JoinPayload, WatcherId};
use super::room_id::RoomId;
use crate::network::LinkState;

/// The room's single source of truth for playback
///
/// Always transmitted whole. `timestamp` is a position in the episode in
/// seconds, not wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalState {
    pub episode_id: Option<EpisodeId>,
    pub timestamp: f64,
    pub playing: bool,
    pub initiator_id: Option<WatcherId>,
    /// Bumped on every canonical write; lets receivers drop stale copies
    #[serde(default)]
    pub seq: u64,
}

impl Default for CanonicalState {
    fn default() -> Self {
        Self {
            episode_id: None,
            timestamp: 0.0,
            playing: false,
            initiator_id: None,
            seq: 0,
        }
    }
}

/// Self-reported viewing status of a watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatcherStatus {
    Connected,
    Playing,
    Paused,
    Buffering,
    Idle,
    #[serde(other)]
    Unknown,
}

/// Advisory snapshot of what one watcher is doing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherState {
    pub id: WatcherId,
    pub display_name: String,
    pub avatar_ref: String,
    pub timestamp: f64,
    /// Fraction of the episode watched (0.0 - 1.0)
    pub progress: f64,
    pub status: WatcherStatus,
}

impl WatcherState {
    /// Fresh state for a watcher that just joined
    pub fn from_join(join: &JoinPayload) -> Self {
        Self {
            id: join.watcher_id,
            display_name: join.display_name.clone(),
            avatar_ref: join.avatar_ref.clone(),
            timestamp: 0.0,
            progress: 0.0,
            status: WatcherStatus::Connected,
        }
    }

    /// Take the playback fields of a report, keeping our identity fields
    pub fn apply_report(&mut self, report: &WatcherState) {
        self.timestamp = report.timestamp;
        self.progress = report.progress;
        self.status = report.status;
    }
}

/// A client's local view of the room it is in
#[derive(Debug, Clone)]
pub struct RoomView {
    pub room_id: RoomId,
    pub local_id: WatcherId,
    pub link: LinkState,
    pub canonical: CanonicalState,
    /// Remote watchers only; the local watcher is never in this map
    pub watchers: HashMap<WatcherId, WatcherState>,
    /// A canonical snapshot could not be applied yet and will be retried
    pub correction_pending: bool,
}

impl RoomView {
    pub fn new(room_id: RoomId, local_id: WatcherId) -> Self {
        Self {
            room_id,
            local_id,
            link: LinkState::Disconnected,
            canonical: CanonicalState::default(),
            watchers: HashMap::new(),
            correction_pending: false,
        }
    }

    /// Check if we currently hold the remote control
    pub fn is_initiator(&self) -> bool {
        self.canonical.initiator_id == Some(self.local_id)
    }

    /// Get remote watchers (initiator first, then others sorted by display name)
    pub fn watcher_list(&self) -> Vec<&WatcherState> {
        let initiator = self.canonical.initiator_id;
        let mut list: Vec<&WatcherState> = self.watchers.values().collect();
        list.sort_by(|a, b| {
            match (Some(a.id) == initiator, Some(b.id) == initiator) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => a
                    .display_name
                    .to_lowercase()
                    .cmp(&b.display_name.to_lowercase())
                    .then(a.id.cmp(&b.id)),
            }
        });
        list
    }

    /// Insert or refresh a remote watcher. Returns true if it was unknown.
    pub fn upsert_watcher(&mut self, state: WatcherState) -> bool {
        self.watchers.insert(state.id, state).is_none()
    }

    pub fn remove_watcher(&mut self, id: WatcherId) -> Option<WatcherState> {
        self.watchers.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(id: u64, name: &str) -> WatcherState {
        WatcherState::from_join(&JoinPayload {
            watcher_id: WatcherId(id),
            display_name: name.to_string(),
            avatar_ref: String::new(),
        })
    }

    #[test]
    fn test_default_canonical_state() {
        let state = CanonicalState::default();
        assert!(!state.playing);
        assert_eq!(state.timestamp, 0.0);
        assert_eq!(state.initiator_id, None);
    }

    #[test]
    fn test_watcher_list_initiator_first() {
        let mut view = RoomView::new(RoomId::parse("movie-night").unwrap(), WatcherId(1));
        view.upsert_watcher(watcher(2, "bob"));
        view.upsert_watcher(watcher(3, "Alice"));
        view.upsert_watcher(watcher(4, "zed"));
        view.canonical.initiator_id = Some(WatcherId(4));

        let names: Vec<&str> = view.watcher_list().iter().map(|w| w.display_name.as_str()).collect();
        assert_eq!(names, vec!["zed", "Alice", "bob"]);
    }

    #[test]
    fn test_upsert_reports_new_watchers_once() {
        let mut view = RoomView::new(RoomId::parse("abc").unwrap(), WatcherId(1));
        assert!(view.upsert_watcher(watcher(2, "bob")));
        assert!(!view.upsert_watcher(watcher(2, "bob")));
        assert!(view.remove_watcher(WatcherId(2)).is_some());
        assert!(view.watchers.is_empty());
    }

    #[test]
    fn test_report_keeps_identity() {
        let mut state = watcher(2, "bob");
        let mut report = watcher(2, "mallory");
        report.timestamp = 30.0;
        report.progress = 0.5;
        report.status = WatcherStatus::Paused;

        state.apply_report(&report);
        assert_eq!(state.display_name, "bob");
        assert_eq!(state.timestamp, 30.0);
        assert_eq!(state.status, WatcherStatus::Paused);
    }

    #[test]
    fn test_unknown_status_tolerated() {
        let status: WatcherStatus = serde_json::from_str(r#""rewinding""#).unwrap();
        assert_eq!(status, WatcherStatus::Unknown);
    }
}
