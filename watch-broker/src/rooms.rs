//! Room registry
//!
//! Owns every live room: its members, their last reported state and the
//! authoritative arbiter. Connections hand decoded messages in here; the
//! registry decides what to fan out to whom.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use watch_core::network::RoomSummary;
use watch_core::sync::{
    Arbiter, CanonicalState, JoinPayload, LeavePayload, PlayPauseProposal, RoomId, Verdict,
    WatchMessage, WatcherId, WatcherState,
};

use crate::metrics::{LogLevel, RoomInfo, SharedMetrics};

/// Identifies one websocket connection for the broker's lifetime
pub type ConnId = u64;

/// Queue feeding one connection's writer
pub type Outbox = mpsc::Sender<WatchMessage>;

struct Member {
    conn: ConnId,
    state: WatcherState,
    outbox: Outbox,
    /// Fired when a newer connection takes over this watcher id
    evict: Option<oneshot::Sender<()>>,
}

struct Room {
    arbiter: Arbiter,
    members: HashMap<WatcherId, Member>,
}

impl Room {
    fn new() -> Self {
        Self {
            arbiter: Arbiter::new(),
            members: HashMap::new(),
        }
    }
}

/// All live rooms
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Room>>,
    metrics: SharedMetrics,
    next_conn: AtomicU64,
}

impl RoomRegistry {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            metrics,
            next_conn: AtomicU64::new(1),
        }
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Admit a watcher into a room, creating the room on first join
    ///
    /// The joiner receives the current snapshot and every other member's
    /// state; the other members receive the joiner's state. A watcher id
    /// already present is taken over by the new connection.
    pub fn join(
        &self,
        room_id: &RoomId,
        conn: ConnId,
        join: JoinPayload,
        outbox: Outbox,
        evict: oneshot::Sender<()>,
    ) {
        let mut rooms = self.rooms.lock();
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            info!(room = %room_id, "Room created");
            self.metrics.write().room_created(room_id.as_str());
            Room::new()
        });

        let watcher = join.watcher_id;
        let state = WatcherState::from_join(&join);

        if let Some(mut previous) = room.members.remove(&watcher) {
            info!(room = %room_id, watcher = %watcher, "Connection #{} replaces #{}", conn, previous.conn);
            self.metrics.write().log(
                LogLevel::Connection,
                format!("#{} replaces #{} for watcher {}", conn, previous.conn, watcher),
            );
            if let Some(evict) = previous.evict.take() {
                let _ = evict.send(());
            }
        }

        let snapshot = room.arbiter.snapshot(Instant::now());
        self.deliver(&outbox, WatchMessage::CanonicalSnapshot(snapshot));
        for member in room.members.values() {
            self.deliver(&outbox, WatchMessage::WatcherState(member.state.clone()));
        }
        self.broadcast(room, Some(watcher), WatchMessage::WatcherState(state.clone()));

        room.members.insert(
            watcher,
            Member {
                conn,
                state,
                outbox,
                evict: Some(evict),
            },
        );

        info!(room = %room_id, watcher = %watcher, "{} joined ({} watching)", join.display_name, room.members.len());
        self.metrics.write().log(
            LogLevel::Room,
            format!("{} joined {} ({} watching)", join.display_name, room_id, room.members.len()),
        );
        self.refresh_metrics(&rooms);
    }

    /// Record a watcher's advisory report and relay it to the room
    pub fn watcher_state(&self, room_id: &RoomId, conn: ConnId, watcher: WatcherId, report: &WatcherState) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(member) = room.members.get_mut(&watcher).filter(|m| m.conn == conn) else {
            debug!(room = %room_id, "Ignoring state from replaced connection #{}", conn);
            return;
        };

        member.state.apply_report(report);
        let state = member.state.clone();
        self.broadcast(room, Some(watcher), WatchMessage::WatcherState(state));
    }

    /// Arbitrate a control proposal
    ///
    /// Accepted proposals are broadcast to the whole room as a snapshot. An
    /// advisory proposal is answered with the current snapshot so the
    /// proposer's player gets pulled back.
    pub fn propose(&self, room_id: &RoomId, conn: ConnId, watcher: WatcherId, proposal: &PlayPauseProposal) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        let Some(outbox) = room
            .members
            .get(&watcher)
            .filter(|m| m.conn == conn)
            .map(|m| m.outbox.clone())
        else {
            debug!(room = %room_id, "Ignoring proposal from replaced connection #{}", conn);
            return;
        };

        let now = Instant::now();
        match room.arbiter.propose(watcher, proposal, now) {
            Verdict::Accepted { state, became_initiator } => {
                if became_initiator {
                    info!(room = %room_id, watcher = %watcher, "Watcher took the remote");
                    self.metrics.write().log(
                        LogLevel::Room,
                        format!("{} now controls {}", watcher, room_id),
                    );
                }
                debug!(room = %room_id, seq = state.seq, "Canonical state now {:?}", state);
                self.metrics.write().proposal(true);
                self.broadcast(room, None, WatchMessage::CanonicalSnapshot(state));
            }
            Verdict::Advisory { initiator } => {
                debug!(room = %room_id, watcher = %watcher, initiator = %initiator, "Advisory proposal");
                self.metrics.write().proposal(false);
                let snapshot = room.arbiter.snapshot(now);
                self.deliver(&outbox, WatchMessage::CanonicalSnapshot(snapshot));
            }
        }
        self.refresh_metrics(&rooms);
    }

    /// Drop a watcher's membership if `conn` still owns it
    ///
    /// Announces the departure, hands the remote back to the room when the
    /// leaver held it, and discards the room once it is empty. Returns
    /// whether anything was removed.
    pub fn remove(&self, room_id: &RoomId, conn: ConnId, watcher: WatcherId) -> bool {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        if !room.members.get(&watcher).is_some_and(|m| m.conn == conn) {
            return false;
        }

        let Some(member) = room.members.remove(&watcher) else {
            return false;
        };
        info!(room = %room_id, watcher = %watcher, "{} left ({} watching)", member.state.display_name, room.members.len());
        self.metrics.write().log(
            LogLevel::Room,
            format!("{} left {}", member.state.display_name, room_id),
        );

        self.broadcast(room, None, WatchMessage::Leave(LeavePayload { watcher_id: watcher }));
        if room.arbiter.release(watcher, Instant::now()) {
            let snapshot = room.arbiter.state().clone();
            self.broadcast(room, None, WatchMessage::CanonicalSnapshot(snapshot));
        }

        if room.members.is_empty() {
            rooms.remove(room_id);
            info!(room = %room_id, "Room is empty, discarding");
            self.metrics.write().room_discarded(room_id.as_str());
        }
        self.refresh_metrics(&rooms);
        true
    }

    /// Resend each room's current snapshot to all of its members
    ///
    /// A snapshot dropped on a full queue is otherwise never repaired, since
    /// nothing is sent to a member until the room changes again.
    pub fn refresh_snapshots(&self) {
        let rooms = self.rooms.lock();
        let now = Instant::now();
        for (room_id, room) in rooms.iter() {
            let snapshot = room.arbiter.snapshot(now);
            debug!(room = %room_id, seq = snapshot.seq, "Refreshing snapshot");
            self.broadcast(room, None, WatchMessage::CanonicalSnapshot(snapshot));
        }
    }

    /// Summaries of every live room
    pub fn list(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock();
        let now = Instant::now();
        let mut summaries: Vec<RoomSummary> = rooms
            .iter()
            .map(|(room_id, room)| RoomSummary {
                room_id: room_id.clone(),
                watchers: room.members.len(),
                state: room.arbiter.snapshot(now),
            })
            .collect();
        summaries.sort_by(|a, b| a.room_id.as_str().cmp(b.room_id.as_str()));
        summaries
    }

    /// Current canonical state of a room, if it is live
    pub fn snapshot(&self, room_id: &RoomId) -> Option<CanonicalState> {
        let rooms = self.rooms.lock();
        rooms.get(room_id).map(|room| room.arbiter.snapshot(Instant::now()))
    }

    pub fn member_count(&self, room_id: &RoomId) -> usize {
        let rooms = self.rooms.lock();
        rooms.get(room_id).map(|room| room.members.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Queue a message for every member except `skip`
    fn broadcast(&self, room: &Room, skip: Option<WatcherId>, message: WatchMessage) {
        for (id, member) in &room.members {
            if Some(*id) == skip {
                continue;
            }
            self.deliver(&member.outbox, message.clone());
        }
    }

    fn deliver(&self, outbox: &Outbox, message: WatchMessage) {
        match outbox.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("Client queue full, dropping {} message", message.kind());
                self.metrics.write().message_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Client writer already gone");
            }
        }
    }

    fn refresh_metrics(&self, rooms: &HashMap<RoomId, Room>) {
        let now = Instant::now();
        let mut room_list: Vec<RoomInfo> = rooms
            .iter()
            .map(|(room_id, room)| {
                let snapshot = room.arbiter.snapshot(now);
                RoomInfo {
                    room_id: room_id.to_string(),
                    watchers: room.members.len(),
                    initiator: snapshot.initiator_id,
                    episode_id: snapshot.episode_id,
                    timestamp: snapshot.timestamp,
                    playing: snapshot.playing,
                    updated_at: now,
                }
            })
            .collect();
        room_list.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        self.metrics.write().room_list = room_list;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use watch_core::sync::WatcherStatus;

    struct Client {
        conn: ConnId,
        id: WatcherId,
        rx: mpsc::Receiver<WatchMessage>,
        evicted: oneshot::Receiver<()>,
    }

    impl Client {
        fn drain(&mut self) -> Vec<WatchMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn snapshots(&mut self) -> Vec<CanonicalState> {
            self.drain()
                .into_iter()
                .filter_map(|m| match m {
                    WatchMessage::CanonicalSnapshot(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Metrics::shared())
    }

    fn room() -> RoomId {
        RoomId::parse("MOVIENIGHT").unwrap()
    }

    fn join(registry: &RoomRegistry, id: u64, capacity: usize) -> Client {
        let conn = registry.next_conn_id();
        let (tx, rx) = mpsc::channel(capacity);
        let (evict_tx, evicted) = oneshot::channel();
        let payload = JoinPayload {
            watcher_id: WatcherId(id),
            display_name: format!("watcher-{}", id),
            avatar_ref: String::new(),
        };
        registry.join(&room(), conn, payload, tx, evict_tx);
        Client {
            conn,
            id: WatcherId(id),
            rx,
            evicted,
        }
    }

    fn propose(registry: &RoomRegistry, client: &Client, timestamp: f64, playing: bool) {
        registry.propose(&room(), client.conn, client.id, &PlayPauseProposal::new(timestamp, playing));
    }

    #[test]
    fn test_join_receives_snapshot_and_peers() {
        let registry = registry();
        let mut a = join(&registry, 1, 16);

        let first = a.drain();
        assert_eq!(first.len(), 1);
        assert!(matches!(&first[0], WatchMessage::CanonicalSnapshot(s) if *s == CanonicalState::default()));

        let mut b = join(&registry, 2, 16);
        let to_b = b.drain();
        assert!(matches!(&to_b[0], WatchMessage::CanonicalSnapshot(_)));
        assert!(matches!(&to_b[1], WatchMessage::WatcherState(s) if s.id == WatcherId(1)));

        let to_a = a.drain();
        assert_eq!(to_a.len(), 1);
        assert!(matches!(&to_a[0], WatchMessage::WatcherState(s) if s.id == WatcherId(2)));
        assert_eq!(registry.member_count(&room()), 2);
    }

    #[test]
    fn test_first_proposal_claims_and_broadcasts() {
        let registry = registry();
        let mut a = join(&registry, 1, 16);
        let mut b = join(&registry, 2, 16);
        a.drain();
        b.drain();

        propose(&registry, &a, 30.0, true);

        let to_a = a.snapshots();
        let to_b = b.snapshots();
        assert_eq!(to_a, to_b);
        assert_eq!(to_a[0].initiator_id, Some(WatcherId(1)));
        assert_eq!(to_a[0].timestamp, 30.0);
        assert!(to_a[0].playing);
        assert_eq!(to_a[0].seq, 1);
    }

    #[test]
    fn test_advisory_answered_only_to_proposer() {
        let registry = registry();
        let mut a = join(&registry, 1, 16);
        let mut b = join(&registry, 2, 16);
        propose(&registry, &a, 30.0, false);
        a.drain();
        b.drain();

        propose(&registry, &b, 99.0, true);

        assert!(a.drain().is_empty());
        let to_b = b.snapshots();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].initiator_id, Some(WatcherId(1)));
        assert_eq!(to_b[0].timestamp, 30.0);
        assert!(!to_b[0].playing);
    }

    #[test]
    fn test_initiator_leaving_hands_off() {
        let registry = registry();
        let a = join(&registry, 1, 16);
        let mut b = join(&registry, 2, 16);
        propose(&registry, &a, 54.0, false);
        b.drain();

        assert!(registry.remove(&room(), a.conn, a.id));

        let to_b = b.drain();
        assert!(matches!(&to_b[0], WatchMessage::Leave(l) if l.watcher_id == WatcherId(1)));
        let WatchMessage::CanonicalSnapshot(released) = &to_b[1] else {
            panic!("expected a snapshot, got {:?}", to_b[1]);
        };
        assert_eq!(released.initiator_id, None);
        assert_eq!(released.timestamp, 54.0);

        propose(&registry, &b, 60.0, true);
        let claimed = b.snapshots();
        assert_eq!(claimed[0].initiator_id, Some(WatcherId(2)));
    }

    #[test]
    fn test_empty_room_is_discarded() {
        let registry = registry();
        let a = join(&registry, 1, 16);
        propose(&registry, &a, 12.0, true);
        assert_eq!(registry.room_count(), 1);

        registry.remove(&room(), a.conn, a.id);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.snapshot(&room()).is_none());

        let mut again = join(&registry, 1, 16);
        assert_eq!(again.snapshots(), vec![CanonicalState::default()]);
    }

    #[test]
    fn test_duplicate_id_replaces_connection() {
        let registry = registry();
        let mut first = join(&registry, 1, 16);
        let mut observer = join(&registry, 2, 16);
        observer.drain();

        let mut second = join(&registry, 1, 16);
        assert!(first.evicted.try_recv().is_ok());
        assert_eq!(registry.member_count(&room()), 2);
        second.drain();

        // The stale connection can no longer act or remove the member
        propose(&registry, &first, 5.0, true);
        assert!(observer.snapshots().is_empty());
        assert!(!registry.remove(&room(), first.conn, first.id));
        assert_eq!(registry.member_count(&room()), 2);

        propose(&registry, &second, 5.0, true);
        assert_eq!(observer.snapshots()[0].initiator_id, Some(WatcherId(1)));
    }

    #[test]
    fn test_watcher_state_keeps_identity() {
        let registry = registry();
        let a = join(&registry, 1, 16);
        let mut b = join(&registry, 2, 16);
        b.drain();

        let report = WatcherState {
            id: WatcherId(77),
            display_name: "spoofed".to_string(),
            avatar_ref: String::new(),
            timestamp: 42.0,
            progress: 0.5,
            status: WatcherStatus::Playing,
        };
        registry.watcher_state(&room(), a.conn, a.id, &report);

        let to_b = b.drain();
        let WatchMessage::WatcherState(state) = &to_b[0] else {
            panic!("expected watcher state");
        };
        assert_eq!(state.id, WatcherId(1));
        assert_eq!(state.display_name, "watcher-1");
        assert_eq!(state.timestamp, 42.0);
        assert_eq!(state.status, WatcherStatus::Playing);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let registry = registry();
        let a = join(&registry, 1, 1);
        let _b = join(&registry, 2, 16);
        // a's single slot is taken by its join snapshot; b's state was dropped
        propose(&registry, &a, 1.0, true);
        assert!(registry.metrics.read().dropped_messages >= 2);
    }

    #[test]
    fn test_refresh_repairs_dropped_snapshot() {
        let registry = registry();
        let mut a = join(&registry, 1, 16);
        let mut b = join(&registry, 2, 1);
        a.drain();
        b.drain();

        // b's queue holds one message, so the second accepted snapshot is lost
        propose(&registry, &a, 10.0, false);
        propose(&registry, &a, 20.0, false);
        assert_eq!(b.snapshots().last().map(|s| s.seq), Some(1));
        a.drain();

        registry.refresh_snapshots();
        let repaired = b.snapshots();
        assert_eq!(repaired.len(), 1);
        assert_eq!(repaired[0].seq, 2);
        assert_eq!(repaired[0].timestamp, 20.0);
        assert_eq!(a.snapshots(), repaired);
    }

    #[test]
    fn test_list_summaries() {
        let registry = registry();
        let a = join(&registry, 1, 16);
        let _b = join(&registry, 2, 16);
        propose(&registry, &a, 10.0, false);

        let rooms = registry.list();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, room());
        assert_eq!(rooms[0].watchers, 2);
        assert_eq!(rooms[0].state.timestamp, 10.0);
        assert_eq!(registry.metrics.read().room_list.len(), 1);
    }
}
