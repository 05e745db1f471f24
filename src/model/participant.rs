//! Participants

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::now_millis;

/// Stable participant identifier (user id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id used when the user record carries none
    pub fn anonymous() -> Self {
        Self("anon".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client announcing presence in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Milliseconds since the Unix epoch
    pub joined_at: u64,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            joined_at: now_millis(),
        }
    }

    /// Build a participant from a loosely populated user profile
    ///
    /// The display name falls back to the email, then to "Anonymous User".
    pub fn from_profile(id: Option<&str>, name: Option<&str>, email: Option<&str>) -> Self {
        let id = id
            .filter(|s| !s.is_empty())
            .map(ParticipantId::new)
            .unwrap_or_else(ParticipantId::anonymous);

        let display_name = name
            .filter(|s| !s.trim().is_empty())
            .or(email.filter(|s| !s.trim().is_empty()))
            .unwrap_or("Anonymous User")
            .to_string();

        Self {
            id,
            display_name,
            joined_at: now_millis(),
        }
    }

    /// Set the join time explicitly
    pub fn joined_at(mut self, millis: u64) -> Self {
        self.joined_at = millis;
        self
    }

    /// Roster label in `id:name` form
    pub fn label(&self) -> String {
        format!("{}:{}", self.id, self.display_name)
    }
}

/// One line of a full roster: a member and how long ago it last spoke
///
/// Members that never report idle time (older relays) count as fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub participant: Participant,
    #[serde(default)]
    pub idle_ms: u64,
}

impl RosterEntry {
    /// A member seen just now
    pub fn fresh(participant: Participant) -> Self {
        Self {
            participant,
            idle_ms: 0,
        }
    }

    pub fn idle(participant: Participant, idle: Duration) -> Self {
        Self {
            participant,
            idle_ms: idle.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn idle_for(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}
