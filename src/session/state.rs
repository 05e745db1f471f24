//! Session connection state

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message_log::MessageLog;
use crate::model::{Message, Participant, ParticipantId, RoomId};
use crate::peer::SignalMessage;
use crate::presence::PresenceRegistry;
use crate::stats::SessionStats;
use crate::transport::TransportKind;

/// Connection status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No room, or every transport failed
    Offline,
    /// Trying transports or reconnecting
    Connecting,
    /// A transport is up
    Connected,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Offline => "Offline",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Notifications for session observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The joined room changed (`None` after leaving)
    RoomChanged(Option<RoomId>),

    /// Connection status or method changed
    StatusChanged {
        status: ConnectionStatus,
        method: Option<TransportKind>,
    },

    /// New messages entered the log, in replicated order
    MessagesAdded(Vec<Message>),

    /// The online roster changed; carries the full roster
    PresenceChanged(Vec<Participant>),

    /// Call members present when this participant entered the call.
    /// The newcomer offers to each of them.
    ExistingPeers(Vec<ParticipantId>),

    /// Someone else entered the call and will send an offer
    NewPeer(ParticipantId),

    /// Call signaling addressed to this participant, or a departure
    Signal(SignalMessage),
}

/// Everything the session knows about the current room
#[derive(Debug)]
pub(crate) struct RoomState {
    pub room: Option<RoomId>,
    pub log: MessageLog,
    pub presence: PresenceRegistry,
    pub status: ConnectionStatus,
    pub method: Option<TransportKind>,
    /// Messages composed while no transport could take them
    pub outbox: VecDeque<Message>,
    pub stats: SessionStats,
    /// Last timestamp handed to a local message
    last_timestamp: u64,
}

impl RoomState {
    pub fn new(local_id: ParticipantId, liveness_window: Duration) -> Self {
        Self {
            room: None,
            log: MessageLog::new(),
            presence: PresenceRegistry::new(local_id, liveness_window),
            status: ConnectionStatus::Offline,
            method: None,
            outbox: VecDeque::new(),
            stats: SessionStats::new(),
            last_timestamp: 0,
        }
    }

    /// Forget the current room. Stats survive.
    pub fn reset(&mut self, room: Option<RoomId>) {
        self.room = room;
        self.log.clear();
        self.presence.clear();
        self.outbox.clear();
        self.status = ConnectionStatus::Offline;
        self.method = None;
        self.stats.queued = 0;
    }

    /// Timestamp for a new local message
    ///
    /// Strictly increasing per session, so `clientId:timestamp` ids never
    /// collide even for messages composed within one millisecond.
    pub fn next_timestamp(&mut self, now: u64) -> u64 {
        let ts = now.max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    pub fn enqueue(&mut self, message: Message) {
        self.outbox.push_back(message);
        self.stats.queued = self.outbox.len() as u64;
    }

    pub fn status_event(&self) -> SessionEvent {
        SessionEvent::StatusChanged {
            status: self.status,
            method: self.method,
        }
    }
}
