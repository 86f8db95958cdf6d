//! Websocket Transport
//!
//! Owns a single duplex connection to the room broker:
//! - at most one connection is live (connecting or connected) at a time
//! - a fixed-interval liveness check reconnects when disconnected and sends
//!   heartbeats while connected
//! - inbound frames are decoded here; malformed ones are dropped
//!
//! The transport runs in its own task. [`Transport`] is the owning guard:
//! dropping it (or calling [`Transport::close`]) stops the timer and closes
//! the connection.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::sync::{self, HeartbeatPayload, WatchMessage};

/// Default liveness check interval
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(3);

/// Default silence after which a connection is considered dead
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Upper bound for a single websocket write (and the final flush on close)
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Websocket URL of the room endpoint
    pub url: String,
    /// How often to check the link (reconnect or heartbeat)
    pub liveness_interval: Duration,
    /// Close a connection that has been silent for this long
    pub stale_after: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why a connection went away. Always recovered by the next liveness check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Failed to open connection: {0}")]
    Open(String),

    #[error("Connection error: {0}")]
    Io(String),

    #[error("Connection closed by peer")]
    ClosedByPeer,

    #[error("No traffic for {0:?}")]
    Stale(Duration),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport task closed")]
    Closed,
}

/// Events emitted by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(WatchMessage),
    Disconnected(ConnectionError),
}

/// Commands sent to the transport task
#[derive(Debug)]
enum TransportCommand {
    Send(WatchMessage),
    /// Start a fresh connection, optionally to a new URL
    Connect { url: Option<String> },
    Shutdown,
}

/// Handle to communicate with the running transport
#[derive(Clone)]
pub struct TransportHandle {
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    link_rx: watch::Receiver<LinkState>,
}

impl TransportHandle {
    /// Send a message if connected
    ///
    /// Messages are dropped, not queued, while the link is down. Only fails
    /// when the transport itself has shut down.
    pub fn send(&self, message: WatchMessage) -> Result<(), TransportError> {
        self.command_tx
            .send(TransportCommand::Send(message))
            .map_err(|_| TransportError::Closed)
    }

    /// Drop the current connection (if any) and connect to `url`
    pub fn connect(&self, url: impl Into<String>) -> Result<(), TransportError> {
        self.command_tx
            .send(TransportCommand::Connect {
                url: Some(url.into()),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Drop the current connection (if any) and connect again
    pub fn reconnect(&self) -> Result<(), TransportError> {
        self.command_tx
            .send(TransportCommand::Connect { url: None })
            .map_err(|_| TransportError::Closed)
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_rx.borrow()
    }
}

/// Owning guard for a running transport
pub struct Transport {
    handle: TransportHandle,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start the transport and begin connecting immediately
    pub fn start(config: TransportConfig) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = watch::channel(LinkState::Disconnected);

        let task = TransportTask {
            config,
            link: Link::Disconnected,
            next_id: 0,
            event_tx,
            io_tx,
            link_tx,
        };
        let task = tokio::spawn(task.run(command_rx, io_rx));

        let transport = Self {
            handle: TransportHandle { command_tx, link_rx },
            task: Some(task),
        };
        (transport, event_rx)
    }

    /// Get a cloneable handle to the transport
    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn send(&self, message: WatchMessage) -> Result<(), TransportError> {
        self.handle.send(message)
    }

    pub fn link_state(&self) -> LinkState {
        self.handle.link_state()
    }

    /// Flush queued frames, close the connection and wait for the task to end
    pub async fn close(mut self) {
        let _ = self.handle.command_tx.send(TransportCommand::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.command_tx.send(TransportCommand::Shutdown);
        }
    }
}

/// Internal events from connection tasks, tagged with their connection id
enum IoEvent {
    Opened {
        id: u64,
        result: Result<WsStream, ConnectionError>,
    },
    Frame {
        id: u64,
        bytes: Vec<u8>,
    },
    /// Control frame (ping/pong) seen
    Touch {
        id: u64,
    },
    Closed {
        id: u64,
        cause: ConnectionError,
    },
}

enum Link {
    Disconnected,
    Connecting {
        id: u64,
        attempt: JoinHandle<()>,
    },
    Connected {
        id: u64,
        out_tx: mpsc::UnboundedSender<Message>,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
        last_seen: Instant,
    },
}

impl Link {
    fn state(&self) -> LinkState {
        match self {
            Link::Disconnected => LinkState::Disconnected,
            Link::Connecting { .. } => LinkState::Connecting,
            Link::Connected { .. } => LinkState::Connected,
        }
    }

    fn id(&self) -> Option<u64> {
        match self {
            Link::Disconnected => None,
            Link::Connecting { id, .. } | Link::Connected { id, .. } => Some(*id),
        }
    }
}

struct TransportTask {
    config: TransportConfig,
    link: Link,
    /// Id of the most recent connection attempt
    next_id: u64,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    io_tx: mpsc::UnboundedSender<IoEvent>,
    link_tx: watch::Sender<LinkState>,
}

impl TransportTask {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
        mut io_rx: mpsc::UnboundedReceiver<IoEvent>,
    ) {
        self.begin_connect();

        let period = self.config.liveness_interval;
        let mut liveness = tokio::time::interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = liveness.tick() => {
                    self.check_liveness();
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(TransportCommand::Send(message)) => self.send(message),
                        Some(TransportCommand::Connect { url }) => {
                            if let Some(url) = url {
                                self.config.url = url;
                            }
                            self.begin_connect();
                        }
                        Some(TransportCommand::Shutdown) | None => {
                            debug!("Transport shutting down");
                            break;
                        }
                    }
                }
                Some(event) = io_rx.recv() => {
                    self.handle_io(event);
                }
            }
        }

        self.shutdown().await;
    }

    fn publish(&self) {
        self.link_tx.send_replace(self.link.state());
    }

    /// Start a new connection attempt, closing whatever came before
    fn begin_connect(&mut self) {
        self.close_link();

        self.next_id += 1;
        let id = self.next_id;
        let url = self.config.url.clone();
        let open_timeout = self.config.stale_after;
        let io_tx = self.io_tx.clone();

        debug!(conn = id, "Connecting to {}", url);
        let attempt = tokio::spawn(async move {
            let result = match tokio::time::timeout(open_timeout, connect_async(url.as_str())).await {
                Ok(Ok((stream, _response))) => Ok(stream),
                Ok(Err(e)) => Err(ConnectionError::Open(e.to_string())),
                Err(_) => Err(ConnectionError::Open(format!(
                    "timed out after {:?}",
                    open_timeout
                ))),
            };
            let _ = io_tx.send(IoEvent::Opened { id, result });
        });

        self.link = Link::Connecting { id, attempt };
        self.publish();
    }

    /// Tear down the live connection without reporting it
    fn close_link(&mut self) {
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Disconnected => {}
            Link::Connecting { id, attempt } => {
                trace!(conn = id, "Aborting connection attempt");
                attempt.abort();
            }
            Link::Connected { id, reader, .. } => {
                // Dropping out_tx lets the writer send a close frame and exit
                trace!(conn = id, "Closing connection");
                reader.abort();
            }
        }
    }

    /// Lose the live connection and report why
    fn drop_link(&mut self, cause: ConnectionError) {
        self.close_link();
        self.publish();
        let _ = self.event_tx.send(TransportEvent::Disconnected(cause));
    }

    fn check_liveness(&mut self) {
        let silent_for = match &self.link {
            Link::Disconnected => None,
            Link::Connecting { .. } => return,
            Link::Connected { last_seen, .. } => Some(last_seen.elapsed()),
        };
        let Some(silent_for) = silent_for else {
            debug!("Liveness check: disconnected, reconnecting");
            self.begin_connect();
            return;
        };

        if silent_for > self.config.stale_after {
            warn!("No traffic for {:?}, dropping connection", silent_for);
            self.drop_link(ConnectionError::Stale(silent_for));
        } else {
            self.send(WatchMessage::Heartbeat(HeartbeatPayload {
                sent_at_ms: unix_millis(),
            }));
        }
    }

    fn send(&mut self, message: WatchMessage) {
        let Link::Connected { id, out_tx, .. } = &self.link else {
            debug!("Not connected, dropping {} message", message.kind());
            return;
        };

        match sync::encode(&message) {
            Ok(text) => {
                if out_tx.send(Message::Text(text)).is_err() {
                    debug!(conn = *id, "Writer gone, dropping {} message", message.kind());
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Opened { id, result } => self.handle_opened(id, result),
            IoEvent::Frame { id, bytes } => self.handle_frame(id, &bytes),
            IoEvent::Touch { id } => {
                if let Link::Connected { id: current, last_seen, .. } = &mut self.link {
                    if *current == id {
                        *last_seen = Instant::now();
                    }
                }
            }
            IoEvent::Closed { id, cause } => {
                if self.link.id() == Some(id) {
                    info!(conn = id, "Connection lost: {}", cause);
                    self.drop_link(cause);
                } else {
                    trace!(conn = id, "Ignoring close of superseded connection");
                }
            }
        }
    }

    fn handle_opened(&mut self, id: u64, result: Result<WsStream, ConnectionError>) {
        let wanted = matches!(self.link, Link::Connecting { id: pending, .. } if pending == id);
        if !wanted {
            // Dropping the stream closes the superseded socket
            debug!(conn = id, "Discarding superseded connection");
            return;
        }

        match result {
            Ok(stream) => {
                let (sink, stream) = stream.split();
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let writer = tokio::spawn(write_loop(id, sink, out_rx));
                let reader = tokio::spawn(read_loop(id, stream, self.io_tx.clone()));

                self.link = Link::Connected {
                    id,
                    out_tx,
                    reader,
                    writer,
                    last_seen: Instant::now(),
                };
                info!(conn = id, "Connected to {}", self.config.url);
                self.publish();
                let _ = self.event_tx.send(TransportEvent::Connected);
            }
            Err(cause) => {
                debug!(conn = id, "{}", cause);
                self.link = Link::Disconnected;
                self.publish();
                let _ = self.event_tx.send(TransportEvent::Disconnected(cause));
            }
        }
    }

    fn handle_frame(&mut self, id: u64, bytes: &[u8]) {
        let Link::Connected { id: current, last_seen, .. } = &mut self.link else {
            return;
        };
        if *current != id {
            trace!(conn = id, "Dropping frame from superseded connection");
            return;
        }
        *last_seen = Instant::now();

        match sync::decode(bytes) {
            Ok(WatchMessage::Heartbeat(_)) => trace!(conn = id, "Heartbeat echo"),
            Ok(message) => {
                let _ = self.event_tx.send(TransportEvent::Message(message));
            }
            Err(e) => warn!(conn = id, "Dropping frame: {}", e),
        }
    }

    async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.link, Link::Disconnected) {
            Link::Connected {
                id,
                out_tx,
                reader,
                writer,
                ..
            } => {
                // Queued frames go out before the close frame
                drop(out_tx);
                if tokio::time::timeout(WRITE_TIMEOUT, writer).await.is_err() {
                    debug!(conn = id, "Timed out flushing connection on shutdown");
                }
                reader.abort();
            }
            Link::Connecting { attempt, .. } => attempt.abort(),
            Link::Disconnected => {}
        }
        self.publish();
    }
}

async fn write_loop(
    id: u64,
    mut sink: SplitSink<WsStream, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = out_rx.recv().await {
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(conn = id, "Write failed: {}", e);
                return;
            }
            Err(_) => {
                debug!(conn = id, "Write timed out");
                return;
            }
        }
    }
    let _ = tokio::time::timeout(WRITE_TIMEOUT, sink.close()).await;
}

async fn read_loop(id: u64, mut stream: SplitStream<WsStream>, io_tx: mpsc::UnboundedSender<IoEvent>) {
    let cause = loop {
        let event = match stream.next().await {
            Some(Ok(Message::Text(text))) => IoEvent::Frame {
                id,
                bytes: text.into_bytes(),
            },
            Some(Ok(Message::Binary(bytes))) => IoEvent::Frame { id, bytes },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => IoEvent::Touch { id },
            Some(Ok(Message::Close(_))) | None => break ConnectionError::ClosedByPeer,
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => break ConnectionError::Io(e.to_string()),
        };
        if io_tx.send(event).is_err() {
            return;
        }
    };
    let _ = io_tx.send(IoEvent::Closed { id, cause });
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{LeavePayload, WatcherId};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    fn fast(url: &str) -> TransportConfig {
        TransportConfig::new(url)
            .with_liveness_interval(Duration::from_millis(50))
            .with_stale_after(Duration::from_millis(400))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport event channel closed")
    }

    fn leave(id: u64) -> WatchMessage {
        WatchMessage::Leave(LeavePayload {
            watcher_id: WatcherId(id),
        })
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_not_fatal() {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"chat","message":{}}"#.into())).await.unwrap();
            ws.send(Message::Text(sync::encode(&leave(9)).unwrap())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (transport, mut events) = Transport::start(fast(&url));
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert_eq!(next_event(&mut events).await, TransportEvent::Message(leave(9)));
        assert_eq!(transport.link_state(), LinkState::Connected);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_echo_keeps_link_alive() {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let mut heartbeats = 0;
            let deadline = Instant::now() + Duration::from_millis(700);
            while Instant::now() < deadline {
                let Ok(Some(Ok(msg))) = tokio::time::timeout_at(deadline, ws.next()).await else {
                    break;
                };
                if let Message::Text(text) = msg {
                    if text.contains(r#""type":"heartbeat""#) {
                        heartbeats += 1;
                    }
                    ws.send(Message::Text(text)).await.unwrap();
                }
            }
            ws.send(Message::Text(sync::encode(&leave(1)).unwrap())).await.unwrap();
            heartbeats
        });

        let (_transport, mut events) = Transport::start(fast(&url));
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        // Echoed heartbeats are consumed, and the link outlives stale_after
        assert_eq!(next_event(&mut events).await, TransportEvent::Message(leave(1)));

        assert!(server.await.unwrap() >= 5);
    }

    #[tokio::test]
    async fn test_silent_connection_goes_stale() {
        let (listener, url) = bind().await;
        let _server = tokio::spawn(async move {
            let _ws = accept(&listener).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (_transport, mut events) = Transport::start(fast(&url));
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected(ConnectionError::Stale(_))
        ));
    }

    #[tokio::test]
    async fn test_reconnects_once_server_is_reachable() {
        let (listener, url) = bind().await;
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (transport, mut events) = Transport::start(fast(&url));
        assert!(matches!(
            next_event(&mut events).await,
            TransportEvent::Disconnected(ConnectionError::Open(_))
        ));
        assert_ne!(transport.link_state(), LinkState::Connected);

        let listener = TcpListener::bind(addr).await.unwrap();
        let reachable_at = Instant::now();
        let _server = tokio::spawn(async move {
            let _ws = accept(&listener).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        // Failed attempts in flight may still report before the good one
        loop {
            match next_event(&mut events).await {
                TransportEvent::Connected => break,
                TransportEvent::Disconnected(ConnectionError::Open(_)) => continue,
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(transport.link_state(), LinkState::Connected);

        // Retried on the next liveness tick, not after some longer backoff
        let waited = reachable_at.elapsed();
        assert!(
            waited <= Duration::from_millis(50 + 500),
            "reconnect took {:?}",
            waited
        );
    }

    #[tokio::test]
    async fn test_new_connection_closes_previous() {
        let (listener, url) = bind().await;
        let (transport, mut events) = Transport::start(fast(&url));

        let mut first = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        transport.handle().reconnect().unwrap();
        let _second = accept(&listener).await;

        // The first socket is closed before the second one is used
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match first.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    }

    #[tokio::test]
    async fn test_connect_switches_to_new_url() {
        let (old_listener, old_url) = bind().await;
        let (new_listener, new_url) = bind().await;
        let (transport, mut events) = Transport::start(fast(&old_url));

        let mut old = accept(&old_listener).await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        transport.handle().connect(new_url).unwrap();
        let mut new = accept(&new_listener).await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

        // The old socket is closed, and traffic goes to the new one
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match old.next().await {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        transport.send(leave(4)).unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match new.next().await {
                    Some(Ok(Message::Text(text))) if !text.contains(r#""type":"heartbeat""#) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("new connection ended: {:?}", other),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(sync::decode(received.as_bytes()).unwrap(), leave(4));

        // Later reconnects keep the new url
        transport.handle().reconnect().unwrap();
        let _again = accept(&new_listener).await;
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (listener, url) = bind().await;
        drop(listener);

        let (transport, _events) = Transport::start(fast(&url));
        assert!(transport.send(leave(3)).is_ok());
        assert_ne!(transport.link_state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_close_stops_the_transport() {
        let (listener, url) = bind().await;
        drop(listener);

        let (transport, _events) = Transport::start(fast(&url));
        let handle = transport.handle();
        transport.close().await;

        assert!(matches!(handle.send(leave(3)), Err(TransportError::Closed)));
        assert_eq!(handle.link_state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_messages() {
        let (listener, url) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let mut received = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    received.push(sync::decode(text.as_bytes()).unwrap());
                }
            }
            received
        });

        let (transport, mut events) = Transport::start(fast(&url));
        assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
        transport.send(leave(4)).unwrap();
        transport.close().await;

        let received = server.await.unwrap();
        assert!(received.contains(&leave(4)));
    }
}
