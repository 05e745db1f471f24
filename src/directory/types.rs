use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{now_millis, ParticipantId, RoomId};

/// Session identifier handed out by the directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub Uuid);

impl SessionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Parameters of a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub creator: ParticipantId,
    pub name: String,
    /// Room to use; a fresh one is derived from the token when absent
    pub room_id: Option<RoomId>,
    pub ttl: Duration,
    pub relay_addr: Option<String>,
}

impl NewSession {
    pub fn new(creator: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            creator,
            name: name.into(),
            room_id: None,
            ttl: Duration::from_secs(24 * 60 * 60),
            relay_addr: None,
        }
    }

    pub fn room(mut self, room: RoomId) -> Self {
        self.room_id = Some(room);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn relay_addr(mut self, addr: impl Into<String>) -> Self {
        self.relay_addr = Some(addr.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: SessionToken,
    pub room_id: RoomId,
    pub creator_id: ParticipantId,
    pub name: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub relay_addr: Option<String>,
    pub members: Vec<ParticipantId>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// An invitation to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: SessionToken,
    pub room_id: RoomId,
    pub invitation: String,
    pub expires_at: u64,
}

impl ShareLink {
    /// Path form `/<token>/join?invitation=<invitation>`
    pub fn path(&self) -> String {
        format!("/{}/join?invitation={}", self.token, self.invitation)
    }
}
