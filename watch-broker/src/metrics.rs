//! Metrics tracking for the broker

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use watch_core::sync::{EpisodeId, WatcherId};

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

pub type SharedMetrics = Arc<RwLock<Metrics>>;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Connection,
    Room,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Connection => "CONN",
            LogLevel::Room => "ROOM",
        }
    }
}

/// Broker metrics
pub struct Metrics {
    /// Server start time
    pub start_time: DateTime<Local>,

    /// Address we are listening on
    pub listen_addr: Option<String>,

    /// Current number of open websocket connections
    pub active_connections: usize,

    /// Total connections since start
    pub total_connections: u64,

    /// Peak simultaneous connections
    pub peak_connections: usize,

    /// Rooms created since start
    pub total_rooms: u64,

    /// Proposals that moved a room's canonical state
    pub accepted_proposals: u64,

    /// Proposals refused because another watcher holds the remote
    pub advisory_proposals: u64,

    /// Frames that failed to decode
    pub malformed_frames: u64,

    /// Messages dropped on a full client queue
    pub dropped_messages: u64,

    /// Live rooms (for display)
    pub room_list: Vec<RoomInfo>,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    /// Server status
    pub status: ServerStatus,
}

/// One live room as shown on the dashboard
#[derive(Clone, Debug)]
pub struct RoomInfo {
    pub room_id: String,
    pub watchers: usize,
    pub initiator: Option<WatcherId>,
    pub episode_id: Option<EpisodeId>,
    pub timestamp: f64,
    pub playing: bool,
    pub updated_at: Instant,
}

impl RoomInfo {
    /// Playback position now, extrapolated while playing
    pub fn position(&self) -> f64 {
        if self.playing {
            self.timestamp + self.updated_at.elapsed().as_secs_f64()
        } else {
            self.timestamp
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ServerStatus {
    Starting,
    Running,
    Error,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Local::now(),
            listen_addr: None,
            active_connections: 0,
            total_connections: 0,
            peak_connections: 0,
            total_rooms: 0,
            accepted_proposals: 0,
            advisory_proposals: 0,
            malformed_frames: 0,
            dropped_messages: 0,
            room_list: Vec::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: ServerStatus::Starting,
        }
    }

    pub fn shared() -> SharedMetrics {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Record a websocket upgrade
    pub fn connection_opened(&mut self, conn: u64, room: &str) {
        self.active_connections += 1;
        self.total_connections += 1;
        if self.active_connections > self.peak_connections {
            self.peak_connections = self.active_connections;
        }
        self.log(
            LogLevel::Connection,
            format!("#{} opened for {}", conn, truncate_room_id(room)),
        );
    }

    pub fn connection_closed(&mut self, conn: u64, reason: &str) {
        self.active_connections = self.active_connections.saturating_sub(1);
        self.log(LogLevel::Connection, format!("#{} closed: {}", conn, reason));
    }

    pub fn room_created(&mut self, room: &str) {
        self.total_rooms += 1;
        self.log(LogLevel::Room, format!("Created {}", truncate_room_id(room)));
    }

    pub fn room_discarded(&mut self, room: &str) {
        self.log(LogLevel::Room, format!("Discarded {}", truncate_room_id(room)));
    }

    pub fn proposal(&mut self, accepted: bool) {
        if accepted {
            self.accepted_proposals += 1;
        } else {
            self.advisory_proposals += 1;
        }
    }

    pub fn malformed_frame(&mut self, conn: u64) {
        self.malformed_frames += 1;
        self.log(LogLevel::Warning, format!("#{} sent a malformed frame", conn));
    }

    pub fn message_dropped(&mut self) {
        self.dropped_messages += 1;
    }

    /// Live room count
    pub fn active_rooms(&self) -> usize {
        self.room_list.len()
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}

/// Truncate a room id for display (show first and last few chars)
pub fn truncate_room_id(room_id: &str) -> String {
    if room_id.chars().count() > 16 {
        let chars: Vec<char> = room_id.chars().collect();
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        room_id.to_string()
    }
}
