//! Chat messages
//!
//! A message is immutable once it has an id. Replicas order messages by
//! `(timestamp, id)`; the id breaks ties between equal timestamps.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::participant::{Participant, ParticipantId};

/// Message identifier, `clientId:timestamp` or relay-issued
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Compose the `clientId:timestamp` form
    pub fn compose(client_id: &str, timestamp: u64) -> Self {
        Self(format!("{}:{}", client_id, timestamp))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable chat entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub author_id: ParticipantId,
    /// Author display name at send time
    pub author: String,
    pub body: String,
    /// Author wall-clock milliseconds; not corrected for skew
    pub timestamp: u64,
}

impl Message {
    /// Build a message authored by `author` with a `clientId:timestamp` id
    pub fn compose(client_id: &str, author: &Participant, body: &str, timestamp: u64) -> Self {
        Self {
            id: MessageId::compose(client_id, timestamp),
            author_id: author.id.clone(),
            author: author.display_name.clone(),
            body: body.to_string(),
            timestamp,
        }
    }

    /// Replicated ordering: timestamp first, id as tie-break
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_id() {
        let author = Participant::new("A", "Alice");
        let msg = Message::compose("A", &author, "hello", 100);
        assert_eq!(msg.id.as_str(), "A:100");
        assert_eq!(msg.author, "Alice");
        assert_eq!(msg.author_id.as_str(), "A");
    }

    #[test]
    fn test_order_tie_break() {
        let a = Participant::new("A", "Alice");
        let b = Participant::new("B", "Bob");
        let m1 = Message::compose("A", &a, "x", 100);
        let m2 = Message::compose("B", &b, "y", 100);
        let m3 = Message::compose("A", &a, "z", 99);

        assert_eq!(m1.order_cmp(&m2), Ordering::Less);
        assert_eq!(m3.order_cmp(&m1), Ordering::Less);
    }
}
