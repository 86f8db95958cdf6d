//! Sync Protocol Messages
//!
//! Every frame on the wire is a flat JSON envelope `{"type": ..., "message": ...}`.
//! This module is the only place that knows that layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::state::{CanonicalState, WatcherState};

/// Identity of a watcher, assigned by the surrounding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatcherId(pub u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Episode identifier from the media catalog
pub type EpisodeId = u64;

/// Announces a watcher to the room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub watcher_id: WatcherId,
    pub display_name: String,
    pub avatar_ref: String,
}

/// A watcher left the room (sent by the watcher itself or by the broker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub watcher_id: WatcherId,
}

/// Control intent: play, pause or seek
///
/// Only proposals are candidates for becoming the room's canonical state.
/// A negative `timestamp` keeps the current position, a missing `episode_id`
/// keeps the current episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayPauseProposal {
    #[serde(default)]
    pub episode_id: Option<EpisodeId>,
    pub timestamp: f64,
    pub playing: bool,
}

impl PlayPauseProposal {
    pub fn new(timestamp: f64, playing: bool) -> Self {
        Self {
            episode_id: None,
            timestamp,
            playing,
        }
    }

    /// Toggle play/pause without moving the playhead
    pub fn keep_position(playing: bool) -> Self {
        Self::new(-1.0, playing)
    }

    pub fn with_episode(mut self, episode_id: EpisodeId) -> Self {
        self.episode_id = Some(episode_id);
        self
    }

    /// Whether this proposal carries an explicit position
    pub fn has_position(&self) -> bool {
        self.timestamp >= 0.0
    }
}

/// Liveness probe, echoed back unchanged by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub sent_at_ms: u64,
}

/// Messages exchanged between watchers and the room broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "camelCase")]
pub enum WatchMessage {
    Join(JoinPayload),
    Leave(LeavePayload),
    WatcherState(WatcherState),
    PlayPauseProposal(PlayPauseProposal),
    CanonicalSnapshot(CanonicalState),
    Heartbeat(HeartbeatPayload),
}

/// The closed set of envelope types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Join,
    Leave,
    WatcherState,
    PlayPauseProposal,
    CanonicalSnapshot,
    Heartbeat,
}

impl MessageKind {
    /// The `type` string used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Leave => "leave",
            MessageKind::WatcherState => "watcherState",
            MessageKind::PlayPauseProposal => "playPauseProposal",
            MessageKind::CanonicalSnapshot => "canonicalSnapshot",
            MessageKind::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WatchMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            WatchMessage::Join(_) => MessageKind::Join,
            WatchMessage::Leave(_) => MessageKind::Leave,
            WatchMessage::WatcherState(_) => MessageKind::WatcherState,
            WatchMessage::PlayPauseProposal(_) => MessageKind::PlayPauseProposal,
            WatchMessage::CanonicalSnapshot(_) => MessageKind::CanonicalSnapshot,
            WatchMessage::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }
}

/// Wire format errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Failed to encode {kind} message: {source}")]
    Encode {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Serialize a message into a text frame
pub fn encode(message: &WatchMessage) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(|source| CodecError::Encode {
        kind: message.kind(),
        source,
    })
}

/// Parse a frame (text or binary) into a message
///
/// Unknown `type` values and payloads that do not match their type both
/// yield [`CodecError::MalformedMessage`].
pub fn decode(frame: &[u8]) -> Result<WatchMessage, CodecError> {
    serde_json::from_slice(frame).map_err(|e| CodecError::MalformedMessage {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::WatcherStatus;

    #[test]
    fn test_envelope_layout() {
        let msg = WatchMessage::Leave(LeavePayload {
            watcher_id: WatcherId(7),
        });
        let json: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();

        assert_eq!(json["type"], "leave");
        assert_eq!(json["message"]["watcherId"], 7);
    }

    #[test]
    fn test_type_names() {
        let msg = WatchMessage::PlayPauseProposal(PlayPauseProposal::new(12.5, true));
        let text = encode(&msg).unwrap();
        assert!(text.contains(r#""type":"playPauseProposal""#));
        assert_eq!(msg.kind().as_str(), "playPauseProposal");

        let msg = WatchMessage::CanonicalSnapshot(CanonicalState::default());
        assert!(encode(&msg).unwrap().contains(r#""type":"canonicalSnapshot""#));
    }

    #[test]
    fn test_decode_watcher_state_from_peer() {
        let frame = br#"{"type":"watcherState","message":{"id":3,"displayName":"Mika","avatarRef":"/thumbs/3.png","timestamp":61.5,"progress":0.25,"status":"playing"}}"#;
        let msg = decode(frame).unwrap();

        match msg {
            WatchMessage::WatcherState(state) => {
                assert_eq!(state.id, WatcherId(3));
                assert_eq!(state.display_name, "Mika");
                assert_eq!(state.status, WatcherStatus::Playing);
                assert_eq!(state.timestamp, 61.5);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_snapshot_without_seq() {
        let frame = br#"{"type":"canonicalSnapshot","message":{"episodeId":null,"timestamp":4.0,"playing":true,"initiatorId":2}}"#;
        let msg = decode(frame).unwrap();

        assert_eq!(
            msg,
            WatchMessage::CanonicalSnapshot(CanonicalState {
                episode_id: None,
                timestamp: 4.0,
                playing: true,
                initiator_id: Some(WatcherId(2)),
                seq: 0,
            })
        );
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = decode(br#"{"type":"chat","message":{"text":"hi"}}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage { .. }));
    }

    #[test]
    fn test_bad_payload_is_malformed() {
        let err = decode(br#"{"type":"leave","message":{"watcherId":"nope"}}"#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage { .. }));

        let err = decode(b"not json at all").unwrap_err();
        assert!(matches!(err, CodecError::MalformedMessage { .. }));
    }

    #[test]
    fn test_proposal_defaults() {
        let msg = decode(br#"{"type":"playPauseProposal","message":{"timestamp":-1,"playing":false}}"#).unwrap();
        match msg {
            WatchMessage::PlayPauseProposal(p) => {
                assert_eq!(p.episode_id, None);
                assert!(!p.has_position());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
