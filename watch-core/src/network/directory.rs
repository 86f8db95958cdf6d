//! Room directory lookups against the broker's HTTP surface
//!
//! Lets a client see which rooms are live before joining one.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sync::{CanonicalState, RoomId};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory returned status {0}")]
    Status(u16),
}

/// One live room as listed by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    /// Number of connected watchers
    pub watchers: usize,
    pub state: CanonicalState,
}

/// Client for the broker's room directory
#[derive(Debug, Clone)]
pub struct RoomDirectory {
    client: Client,
    base_url: String,
}

impl RoomDirectory {
    /// Create a directory client for a broker
    ///
    /// Accepts the broker's websocket URL as well (`ws://` becomes `http://`).
    pub fn new(broker_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: http_base(broker_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the rooms that currently have at least one watcher
    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, DirectoryError> {
        let url = format!("{}/room", self.base_url);
        debug!("Directory: listing rooms at {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DirectoryError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }

    /// Look up a single room; `None` if nobody is in it
    pub async fn find_room(&self, room: &RoomId) -> Result<Option<RoomSummary>, DirectoryError> {
        let rooms = self.list_rooms().await?;
        Ok(rooms.into_iter().find(|r| &r.room_id == room))
    }
}

/// Normalize a broker URL to its HTTP base, without trailing slash
fn http_base(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_from_ws_url() {
        assert_eq!(http_base("ws://127.0.0.1:8080/"), "http://127.0.0.1:8080");
        assert_eq!(http_base("wss://watch.example.org"), "https://watch.example.org");
        assert_eq!(http_base("http://localhost:8080"), "http://localhost:8080");
    }

    #[test]
    fn test_room_summary_wire_shape() {
        let json = r#"{"roomId":"K7QX","watchers":2,"state":{"episodeId":3,"timestamp":12.0,"playing":true,"initiatorId":1,"seq":4}}"#;
        let summary: RoomSummary = serde_json::from_str(json).unwrap();

        assert_eq!(summary.room_id.as_str(), "K7QX");
        assert_eq!(summary.watchers, 2);
        assert_eq!(summary.state.episode_id, Some(3));
    }
}
