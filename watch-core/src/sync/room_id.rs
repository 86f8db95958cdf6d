//! Room Id Generation and Parsing
//!
//! Room ids are opaque shareable tokens. Fresh ones are generated from an
//! unambiguous alphabet; caller-supplied ones are accepted as long as they
//! are URL-path safe.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Characters used in generated ids (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Length of generated ids
const GENERATED_LENGTH: usize = 8;

/// Longest caller-supplied id we accept
const MAX_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRoomId {
    #[error("room id is blank")]
    Blank,

    #[error("room id is longer than {MAX_LENGTH} characters")]
    TooLong,

    #[error("room id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Identifier of a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Generate a random room id
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let mut id = String::with_capacity(GENERATED_LENGTH);
        for _ in 0..GENERATED_LENGTH {
            let idx = rng.gen_range(0..ALPHABET.len());
            id.push(ALPHABET[idx] as char);
        }
        RoomId(id)
    }

    /// Parse a caller-supplied room id
    ///
    /// Surrounding whitespace is ignored; ids are case-sensitive.
    pub fn parse(input: &str) -> Result<Self, InvalidRoomId> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(InvalidRoomId::Blank);
        }
        if trimmed.len() > MAX_LENGTH {
            return Err(InvalidRoomId::TooLong);
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidRoomId::InvalidChar(c));
        }

        Ok(RoomId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = InvalidRoomId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}
