//! Room entry and state types
//!
//! This module defines the per-room state stored in the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;

use crate::message_log::MessageLog;
use crate::model::{Participant, ParticipantId};
use crate::peer::SignalMessage;

use super::config::RegistryConfig;
use super::envelope::{Catchup, Envelope, Payload};

/// State of a room entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// At least one handle is held
    Active,
    /// No handles, waiting for cleanup
    Idle,
}

/// Entry for a single room in the registry
pub struct RoomEntry {
    /// Message cache for late joiners
    pub log: MessageLog,

    /// Awareness state per handle id
    pub awareness: HashMap<u64, Participant>,

    /// Call members per handle id
    pub call: HashMap<u64, ParticipantId>,

    /// Broadcast sender for fan-out to handles
    pub(super) tx: broadcast::Sender<Envelope>,

    /// Number of live handles
    pub ref_count: AtomicU32,

    /// When the last handle was released
    pub released_at: Option<Instant>,

    /// When the room was created
    pub created_at: Instant,

    /// Current room state
    pub state: RoomState,
}

impl RoomEntry {
    pub(super) fn new(config: &RegistryConfig) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            log: MessageLog::with_capacity(config.max_history),
            awareness: HashMap::new(),
            call: HashMap::new(),
            tx,
            ref_count: AtomicU32::new(0),
            released_at: None,
            created_at: Instant::now(),
            state: RoomState::Idle,
        }
    }

    /// Number of live handles
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Catch-up state for a new handle
    pub fn catchup(&self, exclude_handle: u64) -> Catchup {
        Catchup {
            messages: self.log.snapshot(),
            awareness: self
                .awareness
                .iter()
                .filter(|(handle, _)| **handle != exclude_handle)
                .map(|(_, p)| p.clone())
                .collect(),
        }
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Send an envelope to all handles
    ///
    /// Returns the number of receivers, or 0 if there are none.
    pub(super) fn send(&self, envelope: Envelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Apply an envelope to the caches
    ///
    /// Returns `false` for a message whose id is already known; such
    /// duplicates are not re-broadcast.
    pub(super) fn update_caches(&mut self, envelope: &Envelope) -> bool {
        match &envelope.payload {
            Payload::Message(message) => self.log.append(message.clone()),
            Payload::Awareness(participant) => {
                self.awareness.insert(envelope.origin, participant.clone());
                true
            }
            Payload::Departed(_) => {
                self.awareness.remove(&envelope.origin);
                true
            }
            Payload::CallJoined(id) => {
                self.call.insert(envelope.origin, id.clone());
                true
            }
            Payload::Signal(SignalMessage::PeerLeft { .. }) => {
                self.call.remove(&envelope.origin);
                true
            }
            Payload::Signal(_) => true,
        }
    }

    /// Call members other than `exclude_handle`, sorted and deduplicated
    pub fn call_members(&self, exclude_handle: u64) -> Vec<ParticipantId> {
        let mut members: Vec<ParticipantId> = self
            .call
            .iter()
            .filter(|(handle, _)| **handle != exclude_handle)
            .map(|(_, id)| id.clone())
            .collect();
        members.sort();
        members.dedup();
        members
    }
}

/// Statistics for a room
#[derive(Debug, Clone)]
pub struct RoomStats {
    pub ref_count: u32,
    pub state: RoomState,
    pub message_count: usize,
    pub awareness_count: usize,
    pub call_count: usize,
    /// Live broadcast receivers (should equal `ref_count`)
    pub receiver_count: usize,
}

impl RoomStats {
    pub(super) fn of(entry: &RoomEntry) -> Self {
        Self {
            ref_count: entry.ref_count(),
            state: entry.state,
            message_count: entry.log.len(),
            awareness_count: entry.awareness.len(),
            call_count: entry.call.len(),
            receiver_count: entry.tx.receiver_count(),
        }
    }
}
