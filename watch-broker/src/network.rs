//! Network handling for the broker
//!
//! HTTP routes plus one websocket per watcher. Each connection must join
//! before anything else; afterwards decoded messages go to the registry and
//! a writer task drains the connection's outbox.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use watch_core::network::RoomSummary;
use watch_core::sync::{decode, encode, JoinPayload, RoomId, WatchMessage, WatcherId};

use crate::config::BrokerConfig;
use crate::metrics::{LogLevel, ServerStatus, SharedMetrics};
use crate::rooms::{ConnId, Outbox, RoomRegistry};
use crate::BrokerError;

/// Events sent from network to dashboard
#[derive(Debug)]
pub enum NetworkEvent {
    Ready { addr: SocketAddr },
    Failed(String),
}

/// Shared state behind every route
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub registry: Arc<RoomRegistry>,
    pub metrics: SharedMetrics,
}

/// Build the broker's routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/room", get(list_rooms))
        .route("/room/ws/", get(missing_room_id))
        .route("/room/ws/:room_id", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
}

/// A bound broker, ready to serve
pub struct Broker {
    listener: TcpListener,
    state: AppState,
}

impl Broker {
    pub async fn bind(config: BrokerConfig, metrics: SharedMetrics) -> Result<Self, BrokerError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BrokerError::Bind { addr, source })?;

        let state = AppState {
            config: Arc::new(config),
            registry: Arc::new(RoomRegistry::new(Arc::clone(&metrics))),
            metrics,
        };
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        let addr = self.state.config.socket_addr();
        self.listener
            .local_addr()
            .map_err(|source| BrokerError::Bind { addr, source })
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        Arc::clone(&self.state.registry)
    }

    /// Serve until the listener fails
    pub async fn serve(self) -> Result<(), BrokerError> {
        let refresher = tokio::spawn(refresh_loop(
            Arc::clone(&self.state.registry),
            self.state.config.snapshot_interval,
        ));
        let app = router(self.state);
        let result = axum::serve(self.listener, app)
            .await
            .map_err(BrokerError::Serve);
        refresher.abort();
        result
    }
}

/// Periodically resend every room's snapshot so dropped ones get repaired
async fn refresh_loop(registry: Arc<RoomRegistry>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        registry.refresh_snapshots();
    }
}

/// Run the broker, reporting readiness to the dashboard
pub async fn run_with_dashboard(
    config: BrokerConfig,
    metrics: SharedMetrics,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
) -> Result<(), BrokerError> {
    info!("Watch Broker starting...");

    let broker = match Broker::bind(config, Arc::clone(&metrics)).await {
        Ok(broker) => broker,
        Err(e) => {
            {
                let mut m = metrics.write();
                m.status = ServerStatus::Error;
                m.log(LogLevel::Error, e.to_string());
            }
            let _ = event_tx.send(NetworkEvent::Failed(e.to_string()));
            return Err(e);
        }
    };

    let addr = broker.local_addr()?;
    info!("Listening on {}", addr);
    {
        let mut m = metrics.write();
        m.listen_addr = Some(addr.to_string());
        m.status = ServerStatus::Running;
        m.log(LogLevel::Info, format!("Listening on {}", addr));
    }
    let _ = event_tx.send(NetworkEvent::Ready { addr });

    let result = broker.serve().await;
    if let Err(e) = &result {
        let mut m = metrics.write();
        m.status = ServerStatus::Error;
        m.log(LogLevel::Error, e.to_string());
    }
    result
}

/// Run with plain logging (no dashboard)
pub async fn run_with_logging(config: BrokerConfig, metrics: SharedMetrics) -> Result<(), BrokerError> {
    // Initialize tracing for logging mode
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("watch_broker=info,watch_core=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let (tx, _rx) = mpsc::unbounded_channel();
    run_with_dashboard(config, metrics, tx).await
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.list())
}

async fn health() -> &'static str {
    "ok"
}

async fn missing_room_id() -> Response {
    (StatusCode::BAD_REQUEST, "room id must not be blank").into_response()
}

/// WebSocket upgrade handler
///
/// Rejects invalid room ids before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let room = match RoomId::parse(&room_id) {
        Ok(room) => room,
        Err(e) => {
            warn!("Rejecting websocket for room {:?}: {}", room_id, e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let max_message_size = state.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, room, state))
}

/// Why a connection's read side ended
#[derive(Debug, PartialEq)]
enum Exit {
    Left,
    Closed,
    Idle,
    Evicted,
    Error(String),
}

impl Exit {
    fn describe(&self) -> String {
        match self {
            Exit::Left => "left".to_string(),
            Exit::Closed => "closed by client".to_string(),
            Exit::Idle => "idle timeout".to_string(),
            Exit::Evicted => "replaced by newer connection".to_string(),
            Exit::Error(e) => format!("error: {}", e),
        }
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, room: RoomId, state: AppState) {
    let conn = state.registry.next_conn_id();
    let config = Arc::clone(&state.config);
    state.metrics.write().connection_opened(conn, room.as_str());
    debug!(room = %room, "Connection #{} opened", conn);

    let (mut sink, mut stream) = socket.split();

    let join = match timeout(config.join_timeout, wait_for_join(&mut stream, conn, &state)).await {
        Ok(Some(join)) => join,
        Ok(None) => {
            state.metrics.write().connection_closed(conn, "closed before joining");
            return;
        }
        Err(_) => {
            warn!(room = %room, "Connection #{} did not join within {:?}", conn, config.join_timeout);
            let _ = timeout(config.write_timeout, sink.close()).await;
            state.metrics.write().connection_closed(conn, "join timeout");
            return;
        }
    };

    let watcher = join.watcher_id;
    let (outbox, outbox_rx) = mpsc::channel(config.client_buffer);
    let (evict_tx, evict_rx) = oneshot::channel();
    state.registry.join(&room, conn, join, outbox.clone(), evict_tx);

    let writer = tokio::spawn(write_loop(sink, outbox_rx, Arc::clone(&config), conn));

    let exit = read_loop(&mut stream, evict_rx, &outbox, &room, conn, watcher, &state).await;
    info!(room = %room, watcher = %watcher, "Connection #{} finished: {}", conn, exit.describe());

    if exit != Exit::Evicted {
        state.registry.remove(&room, conn, watcher);
    }

    // The writer drains what is queued, then closes once every outbox is gone
    drop(outbox);
    if timeout(config.write_timeout, writer).await.is_err() {
        debug!("Writer for #{} did not finish in time", conn);
    }
    state.metrics.write().connection_closed(conn, &exit.describe());
}

/// Wait for the join that must open every connection
///
/// Anything else before it is ignored. Returns `None` if the client goes
/// away first.
async fn wait_for_join(
    stream: &mut SplitStream<WebSocket>,
    conn: ConnId,
    state: &AppState,
) -> Option<JoinPayload> {
    while let Some(frame) = stream.next().await {
        let bytes = match frame {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                debug!("Connection #{} failed before joining: {}", conn, e);
                return None;
            }
        };

        match decode(&bytes) {
            Ok(WatchMessage::Join(join)) => return Some(join),
            Ok(other) => debug!("Ignoring {} from #{} before join", other.kind(), conn),
            Err(e) => {
                warn!("Malformed frame from #{}: {}", conn, e);
                state.metrics.write().malformed_frame(conn);
            }
        }
    }
    None
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    mut evict_rx: oneshot::Receiver<()>,
    outbox: &Outbox,
    room: &RoomId,
    conn: ConnId,
    watcher: WatcherId,
    state: &AppState,
) -> Exit {
    let idle_after = state.config.ping_timeout;

    loop {
        tokio::select! {
            _ = &mut evict_rx => return Exit::Evicted,

            frame = timeout(idle_after, stream.next()) => {
                let bytes = match frame {
                    Err(_) => return Exit::Idle,
                    Ok(None) => return Exit::Closed,
                    Ok(Some(Err(e))) => return Exit::Error(e.to_string()),
                    Ok(Some(Ok(Message::Text(text)))) => text.into_bytes(),
                    Ok(Some(Ok(Message::Binary(bytes)))) => bytes,
                    Ok(Some(Ok(Message::Close(_)))) => return Exit::Closed,
                    // Ping/pong only keep the connection alive
                    Ok(Some(Ok(_))) => continue,
                };

                let message = match decode(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(room = %room, "Malformed frame from #{}: {}", conn, e);
                        state.metrics.write().malformed_frame(conn);
                        continue;
                    }
                };

                match message {
                    WatchMessage::Heartbeat(heartbeat) => {
                        if outbox.try_send(WatchMessage::Heartbeat(heartbeat)).is_err() {
                            state.metrics.write().message_dropped();
                        }
                    }
                    WatchMessage::WatcherState(report) => {
                        state.registry.watcher_state(room, conn, watcher, &report);
                    }
                    WatchMessage::PlayPauseProposal(proposal) => {
                        state.registry.propose(room, conn, watcher, &proposal);
                    }
                    WatchMessage::Leave(_) => return Exit::Left,
                    other => {
                        debug!("Ignoring {} from #{}", other.kind(), conn);
                    }
                }
            }
        }
    }
}

/// Drain the outbox onto the socket, pinging while idle
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<WatchMessage>,
    config: Arc<BrokerConfig>,
    conn: ConnId,
) {
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            message = outbox_rx.recv() => match message {
                Some(message) => match encode(&message) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!("Failed to encode for #{}: {}", conn, e);
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match timeout(config.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to #{} failed: {}", conn, e);
                return;
            }
            Err(_) => {
                warn!("Write to #{} timed out after {:?}", conn, config.write_timeout);
                return;
            }
        }
    }

    let _ = timeout(config.write_timeout, sink.close()).await;
}
