//! Core value types shared by every layer
//!
//! Rooms, participants and messages are plain serializable values. A room
//! is only a key that namespaces everything else.

pub mod message;
pub mod participant;
pub mod room;

pub use message::{Message, MessageId};
pub use participant::{Participant, ParticipantId, RosterEntry};
pub use room::RoomId;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
