//! Room broadcast payloads
//!
//! Envelopes are cheap to clone; each handle receives every envelope
//! published to its room and drops the ones it published itself.

use crate::model::{Message, Participant, ParticipantId};
use crate::peer::SignalMessage;

/// What is being broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A chat message
    Message(Message),
    /// Awareness state (announce or refresh)
    Awareness(Participant),
    /// Awareness state removed
    Departed(ParticipantId),
    /// Call signaling; receivers drop messages addressed to someone else
    Signal(SignalMessage),
    /// The publisher entered the room's call
    CallJoined(ParticipantId),
}

/// A payload tagged with the handle that published it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Handle id of the publisher
    pub origin: u64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(origin: u64, payload: Payload) -> Self {
        Self { origin, payload }
    }
}

/// State handed to a newly acquired handle
#[derive(Debug, Clone, Default)]
pub struct Catchup {
    /// Cached messages in replicated order
    pub messages: Vec<Message>,
    /// Current awareness states of other handles
    pub awareness: Vec<Participant>,
}
