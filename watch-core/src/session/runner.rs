//! Session task
//!
//! One task per room membership. It owns the transport, the player and all
//! room state, so nothing here needs locking: transport events, commands
//! and the rebroadcast tick are handled one at a time.

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::network::{LinkState, Transport, TransportEvent};
use crate::player::Player;
use crate::sync::{Arbiter, LeavePayload, Reconciler, RoomView, WatchMessage};

use super::handle::SessionHandle;
use super::types::{SessionCommand, SessionConfig, SessionEvent};

/// A watcher's membership in one room
pub struct Session<P: Player> {
    pub(super) config: SessionConfig,
    pub(super) player: P,
    pub(super) transport: Transport,
    pub(super) view: RoomView,
    pub(super) arbiter: Arbiter,
    pub(super) reconciler: Reconciler,
    /// Whether the broker link is up (and we have sent our join)
    pub(super) joined: bool,
    pub(super) event_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(super) view_tx: watch::Sender<RoomView>,
}

impl<P: Player> Session<P> {
    /// Join a room and start syncing `player` with it
    ///
    /// Must be called from within a tokio runtime. Connecting starts
    /// immediately; dropping the returned handle ends the session.
    pub fn start(
        config: SessionConfig,
        player: P,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let local_id = config.identity.watcher_id;
        let view = RoomView::new(config.room.clone(), local_id);
        let (view_tx, view_rx) = watch::channel(view.clone());

        info!(room = %config.room, watcher = %local_id, "Starting session");

        let (transport, transport_rx) = Transport::start(config.transport_config());
        let session = Session {
            reconciler: Reconciler::new(config.drift_threshold),
            config,
            player,
            transport,
            view,
            arbiter: Arbiter::new(),
            joined: false,
            event_tx,
            view_tx,
        };

        let task = tokio::spawn(session.run(transport_rx, command_rx));
        let handle = SessionHandle::new(command_tx, view_rx, local_id, task);
        (handle, event_rx)
    }

    async fn run(
        mut self,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let period = self.config.rebroadcast_interval;
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let leave_done = loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.on_tick();
                }
                event = transport_rx.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => break None,
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Leave { done }) => break Some(done),
                        Some(SessionCommand::Shutdown) | None => break None,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
            }
        };

        // Teardown: say goodbye if asked to, close the link, forget the room
        let leaving = leave_done.is_some();
        if leaving {
            info!(room = %self.config.room, "Leaving room");
            self.send(WatchMessage::Leave(LeavePayload {
                watcher_id: self.view.local_id,
            }));
        }
        self.transport.close().await;

        self.joined = false;
        self.view.watchers.clear();
        self.view.correction_pending = false;
        self.view.link = LinkState::Disconnected;
        self.view_tx.send_replace(self.view.clone());

        if let Some(done) = leave_done {
            let _ = self.event_tx.send(SessionEvent::Left);
            let _ = done.send(());
        }
        debug!(room = %self.config.room, "Session ended");
    }

    pub(super) fn send(&self, message: WatchMessage) {
        if let Err(e) = self.transport.send(message) {
            debug!("Send failed: {}", e);
        }
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Push the current view to watchers of the room state
    pub(super) fn publish(&mut self) {
        self.view.link = self.transport.link_state();
        self.view.correction_pending = self.reconciler.has_pending();
        self.view_tx.send_replace(self.view.clone());
    }
}
