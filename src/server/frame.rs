//! Relay protocol frames

use serde::{Deserialize, Serialize};

use crate::model::{Message, MessageId, Participant, ParticipantId, RoomId, RosterEntry};
use crate::peer::SignalMessage;

/// A relay protocol frame, in either direction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayFrame {
    // Client -> server
    /// Join a room as `user`
    JoinRoom { room: RoomId, user: Participant },

    /// Leave the current room
    LeaveRoom { room: RoomId },

    /// Post a message. Without an id the relay issues one.
    SendMessage {
        room: RoomId,
        id: Option<MessageId>,
        body: String,
        timestamp: Option<u64>,
    },

    /// Keep-alive; refreshes the sender's last-seen time
    Ping,

    /// Enter the room's call
    JoinCall { room: RoomId },

    /// Leave the room's call but stay in the room
    LeaveCall { room: RoomId },

    // Both directions
    /// Call signaling. Addressed signals go to their recipient, the rest to
    /// every other call member.
    Signal { room: RoomId, signal: SignalMessage },

    // Server -> client
    /// Reply to `Ping`, with the current roster
    Pong { online_users: Vec<RosterEntry> },

    /// Full room state, sent after a join
    RoomState {
        room: RoomId,
        messages: Vec<Message>,
        online_users: Vec<RosterEntry>,
    },

    /// A message accepted by the relay
    NewMessage { message: Message },

    UserJoined {
        user: Participant,
        online_users: Vec<RosterEntry>,
    },

    UserLeft {
        user: Participant,
        online_users: Vec<RosterEntry>,
    },

    /// Reply to `JoinCall`: who was already in the call
    ExistingPeers { peers: Vec<ParticipantId> },

    /// Someone else entered the call
    NewPeer { peer: ParticipantId },

    /// Request rejected
    Error { message: String },

    /// Server is closing this connection; clients must not reconnect
    Bye { reason: String },
}

impl RelayFrame {
    /// Frame name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RelayFrame::JoinRoom { .. } => "join-room",
            RelayFrame::LeaveRoom { .. } => "leave-room",
            RelayFrame::SendMessage { .. } => "send-message",
            RelayFrame::Ping => "ping",
            RelayFrame::JoinCall { .. } => "join-call",
            RelayFrame::LeaveCall { .. } => "leave-call",
            RelayFrame::Signal { .. } => "signal",
            RelayFrame::Pong { .. } => "pong",
            RelayFrame::RoomState { .. } => "room-state",
            RelayFrame::NewMessage { .. } => "new-message",
            RelayFrame::UserJoined { .. } => "user-joined",
            RelayFrame::UserLeft { .. } => "user-left",
            RelayFrame::ExistingPeers { .. } => "existing-peers",
            RelayFrame::NewPeer { .. } => "new-peer",
            RelayFrame::Error { .. } => "error",
            RelayFrame::Bye { .. } => "bye",
        }
    }

    /// Build a `SendMessage` frame from a locally composed message
    pub fn send_message(room: &RoomId, message: &Message) -> Self {
        RelayFrame::SendMessage {
            room: room.clone(),
            id: Some(message.id.clone()),
            body: message.body.clone(),
            timestamp: Some(message.timestamp),
        }
    }
}
