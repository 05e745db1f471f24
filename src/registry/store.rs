//! Room registry implementation
//!
//! The central owner of all shared room resources. Handles are reference
//! counted; a room with no handles is kept idle for a while and then
//! removed by cleanup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};

use crate::model::{ParticipantId, RoomId};
use crate::peer::SignalMessage;

use super::config::RegistryConfig;
use super::entry::{RoomEntry, RoomState, RoomStats};
use super::envelope::{Catchup, Envelope, Payload};
use super::error::RegistryError;

/// Central registry for all rooms in the process
///
/// Thread-safe via `RwLock`. Publishing and receiving take the outer lock
/// for reading only.
pub struct RoomRegistry {
    /// Map of room id to room entry
    rooms: RwLock<HashMap<RoomId, Arc<RwLock<RoomEntry>>>>,

    /// Configuration
    config: RegistryConfig,

    /// Next handle id (also used as envelope origin)
    next_handle_id: AtomicU64,
}

impl RoomRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Take a reference on a room, creating it if needed
    ///
    /// Returns the handle and the catch-up state (cached messages and the
    /// awareness states of other handles).
    pub async fn acquire(self: &Arc<Self>, room: &RoomId) -> (RoomHandle, Catchup) {
        let mut rooms = self.rooms.write().await;

        let entry_arc = match rooms.get(room) {
            Some(entry_arc) => Arc::clone(entry_arc),
            None => {
                let entry_arc = Arc::new(RwLock::new(RoomEntry::new(&self.config)));
                rooms.insert(room.clone(), Arc::clone(&entry_arc));
                tracing::info!(room = %room, "Room created");
                entry_arc
            }
        };

        let mut entry = entry_arc.write().await;
        let handle_id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);

        let rx = entry.subscribe();
        let catchup = entry.catchup(handle_id);
        entry.ref_count.fetch_add(1, Ordering::Relaxed);
        entry.state = RoomState::Active;
        entry.released_at = None;

        tracing::info!(
            room = %room,
            handle = handle_id,
            refs = entry.ref_count(),
            catchup_messages = catchup.messages.len(),
            "Room acquired"
        );

        let handle = RoomHandle {
            id: handle_id,
            room: room.clone(),
            registry: Arc::clone(self),
            rx,
            released: false,
        };

        (handle, catchup)
    }

    /// Drop one reference on a room
    async fn release(&self, room: &RoomId, handle_id: u64) {
        let rooms = self.rooms.read().await;

        let Some(entry_arc) = rooms.get(room) else {
            tracing::warn!(room = %room, handle = handle_id, "Release for unknown room");
            return;
        };

        let mut entry = entry_arc.write().await;

        if let Some(id) = entry.call.remove(&handle_id) {
            entry.send(Envelope::new(handle_id, Payload::Signal(SignalMessage::PeerLeft { from: id })));
        }
        if let Some(participant) = entry.awareness.remove(&handle_id) {
            entry.send(Envelope::new(handle_id, Payload::Departed(participant.id)));
        }

        let prev = entry.ref_count.fetch_sub(1, Ordering::Relaxed);
        let remaining = prev.saturating_sub(1);

        if remaining == 0 {
            entry.state = RoomState::Idle;
            entry.released_at = Some(Instant::now());
            tracing::info!(room = %room, handle = handle_id, "Room released, now idle");
        } else {
            tracing::debug!(room = %room, handle = handle_id, refs = remaining, "Room released");
        }
    }

    /// Publish an envelope to every handle of a room
    ///
    /// Messages with an already known id are dropped without broadcasting.
    /// Returns the number of receivers reached.
    pub async fn publish(&self, room: &RoomId, envelope: Envelope) -> Result<usize, RegistryError> {
        let rooms = self.rooms.read().await;

        let entry_arc = rooms
            .get(room)
            .ok_or_else(|| RegistryError::RoomNotFound(room.clone()))?;

        let mut entry = entry_arc.write().await;

        if !entry.update_caches(&envelope) {
            tracing::debug!(room = %room, origin = envelope.origin, "Duplicate message dropped");
            return Ok(0);
        }

        Ok(entry.send(envelope))
    }

    /// Enter the room's call as `id` through `handle_id`
    ///
    /// Returns the members already in the call. The lookup and the
    /// announcement happen under one lock, so two members joining at once
    /// never both see each other as existing. Joining twice announces once.
    pub async fn join_call(
        &self,
        room: &RoomId,
        handle_id: u64,
        id: ParticipantId,
    ) -> Result<Vec<ParticipantId>, RegistryError> {
        let rooms = self.rooms.read().await;

        let entry_arc = rooms
            .get(room)
            .ok_or_else(|| RegistryError::RoomNotFound(room.clone()))?;

        let mut entry = entry_arc.write().await;
        let existing = entry.call_members(handle_id);
        if entry.call.get(&handle_id) != Some(&id) {
            let envelope = Envelope::new(handle_id, Payload::CallJoined(id));
            entry.update_caches(&envelope);
            entry.send(envelope);
        }
        Ok(existing)
    }

    /// Current catch-up state of a room, as seen by `handle_id`
    pub async fn catchup(&self, room: &RoomId, handle_id: u64) -> Result<Catchup, RegistryError> {
        let rooms = self.rooms.read().await;

        let entry_arc = rooms
            .get(room)
            .ok_or_else(|| RegistryError::RoomNotFound(room.clone()))?;

        let entry = entry_arc.read().await;
        Ok(entry.catchup(handle_id))
    }

    /// Check if a room exists (active or idle)
    pub async fn has_room(&self, room: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room)
    }

    /// Number of live handles on a room (0 if unknown)
    pub async fn ref_count(&self, room: &RoomId) -> u32 {
        let rooms = self.rooms.read().await;

        match rooms.get(room) {
            Some(entry_arc) => entry_arc.read().await.ref_count(),
            None => 0,
        }
    }

    /// Get room statistics
    pub async fn room_stats(&self, room: &RoomId) -> Option<RoomStats> {
        let rooms = self.rooms.read().await;

        let entry_arc = rooms.get(room)?;
        let entry = entry_arc.read().await;
        Some(RoomStats::of(&entry))
    }

    /// Get total number of rooms
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Run cleanup once
    ///
    /// Removes rooms that have been idle longer than `idle_room_timeout`.
    pub async fn cleanup(&self) {
        let mut rooms = self.rooms.write().await;
        let now = Instant::now();

        let to_remove: Vec<RoomId> = rooms
            .iter()
            .filter_map(|(room, entry_arc)| {
                // Skip entries that are busy right now
                let entry = entry_arc.try_read().ok()?;
                let expired = entry.state == RoomState::Idle
                    && entry.ref_count() == 0
                    && entry
                        .released_at
                        .map(|at| now.duration_since(at) >= self.config.idle_room_timeout)
                        .unwrap_or(false);
                expired.then(|| room.clone())
            })
            .collect();

        for room in to_remove {
            rooms.remove(&room);
            tracing::info!(room = %room, "Room removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// What a handle receives
#[derive(Debug, Clone)]
pub enum Received {
    /// An envelope published by another handle
    Envelope(Envelope),
    /// The handle fell behind; here is the full current state instead
    Resync(Catchup),
}

/// One reference on a room
///
/// Release it with [`RoomHandle::release`]. Dropping an unreleased handle
/// inside a runtime releases it in the background.
pub struct RoomHandle {
    id: u64,
    room: RoomId,
    registry: Arc<RoomRegistry>,
    rx: broadcast::Receiver<Envelope>,
    released: bool,
}

impl RoomHandle {
    /// Handle id, used as the origin of published envelopes
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Publish a payload to the other handles of this room
    pub async fn publish(&self, payload: Payload) -> Result<usize, RegistryError> {
        self.registry
            .publish(&self.room, Envelope::new(self.id, payload))
            .await
    }

    /// Enter the room's call; returns the members already in it
    pub async fn join_call(&self, id: ParticipantId) -> Result<Vec<ParticipantId>, RegistryError> {
        self.registry.join_call(&self.room, self.id, id).await
    }

    /// Wait for the next envelope from another handle
    ///
    /// Returns `None` once the room's channel is closed.
    pub async fn recv(&mut self) -> Option<Received> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.origin == self.id => continue,
                Ok(envelope) => return Some(Received::Envelope(envelope)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %self.room, handle = self.id, skipped, "Handle lagged, resyncing");
                    match self.registry.catchup(&self.room, self.id).await {
                        Ok(catchup) => return Some(Received::Resync(catchup)),
                        Err(_) => return None,
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Give the reference back
    pub async fn release(mut self) {
        self.released = true;
        self.registry.release(&self.room, self.id).await;
    }
}

impl Drop for RoomHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let registry = Arc::clone(&self.registry);
                let room = self.room.clone();
                let id = self.id;
                runtime.spawn(async move {
                    registry.release(&room, id).await;
                });
            }
            Err(_) => {
                tracing::warn!(room = %self.room, handle = self.id, "Handle dropped outside runtime");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::{Message, Participant, ParticipantId};

    fn message(client: &str, body: &str, ts: u64) -> Message {
        Message::compose(client, &Participant::new(client, client), body, ts)
    }

    #[tokio::test]
    async fn test_acquire_release_ref_counting() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        let (b, _) = registry.acquire(&room).await;
        assert_eq!(registry.ref_count(&room).await, 2);
        assert_ne!(a.id(), b.id());

        a.release().await;
        assert_eq!(registry.ref_count(&room).await, 1);

        b.release().await;
        let stats = registry.room_stats(&room).await.unwrap();
        assert_eq!(stats.ref_count, 0);
        assert_eq!(stats.state, RoomState::Idle);
        assert_eq!(stats.receiver_count, 0);
    }

    #[tokio::test]
    async fn test_publish_skips_own_origin() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (mut a, _) = registry.acquire(&room).await;
        let (mut b, _) = registry.acquire(&room).await;

        let reached = a.publish(Payload::Message(message("A", "hello", 100))).await.unwrap();
        assert_eq!(reached, 2);

        match b.recv().await.unwrap() {
            Received::Envelope(env) => {
                assert_eq!(env.origin, a.id());
                assert!(matches!(env.payload, Payload::Message(ref m) if m.body == "hello"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // `a` never sees its own envelope
        let own = tokio::time::timeout(Duration::from_millis(50), a.recv()).await;
        assert!(own.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_message_not_rebroadcast() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        let (_b, _) = registry.acquire(&room).await;

        let msg = message("A", "hello", 100);
        assert_eq!(a.publish(Payload::Message(msg.clone())).await.unwrap(), 2);
        assert_eq!(a.publish(Payload::Message(msg)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_catchup_for_late_joiner() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        a.publish(Payload::Awareness(Participant::new("A", "Alice")))
            .await
            .unwrap();
        a.publish(Payload::Message(message("A", "second", 200))).await.unwrap();
        a.publish(Payload::Message(message("A", "first", 100))).await.unwrap();

        let (_late, catchup) = registry.acquire(&room).await;
        assert_eq!(catchup.messages.len(), 2);
        assert_eq!(catchup.messages[0].body, "first");
        assert_eq!(catchup.awareness.len(), 1);
        assert_eq!(catchup.awareness[0].id.as_str(), "A");
    }

    #[tokio::test]
    async fn test_release_announces_departure() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        let (mut b, _) = registry.acquire(&room).await;

        a.publish(Payload::Awareness(Participant::new("A", "Alice")))
            .await
            .unwrap();
        let _ = b.recv().await;

        a.release().await;
        match b.recv().await.unwrap() {
            Received::Envelope(env) => {
                assert!(matches!(env.payload, Payload::Departed(ref id) if id.as_str() == "A"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_membership() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        let (mut b, _) = registry.acquire(&room).await;

        assert!(a.join_call(ParticipantId::new("A")).await.unwrap().is_empty());
        match b.recv().await.unwrap() {
            Received::Envelope(env) => {
                assert!(matches!(env.payload, Payload::CallJoined(ref id) if id.as_str() == "A"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Rejoining announces nothing new
        assert!(a.join_call(ParticipantId::new("A")).await.unwrap().is_empty());
        let existing = b.join_call(ParticipantId::new("B")).await.unwrap();
        assert_eq!(existing, vec![ParticipantId::new("A")]);
        assert_eq!(registry.room_stats(&room).await.unwrap().call_count, 2);

        // Releasing a call member tells the rest of the call
        a.release().await;
        match b.recv().await.unwrap() {
            Received::Envelope(env) => assert_eq!(
                env.payload,
                Payload::Signal(SignalMessage::PeerLeft {
                    from: ParticipantId::new("A")
                })
            ),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.room_stats(&room).await.unwrap().call_count, 1);
    }

    #[tokio::test]
    async fn test_publish_unknown_room() {
        let registry = RoomRegistry::new();
        let result = registry
            .publish(&RoomId::new("nope"), Envelope::new(1, Payload::Departed(ParticipantId::new("x"))))
            .await;
        assert!(matches!(result, Err(RegistryError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_cleanup_removes_idle_rooms() {
        let config = RegistryConfig::default().idle_room_timeout(Duration::from_millis(20));
        let registry = Arc::new(RoomRegistry::with_config(config));
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        registry.cleanup().await;
        assert!(registry.has_room(&room).await);

        a.release().await;
        registry.cleanup().await;
        assert!(registry.has_room(&room).await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.cleanup().await;
        assert!(!registry.has_room(&room).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_reacquire_keeps_history() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        let (a, _) = registry.acquire(&room).await;
        a.publish(Payload::Message(message("A", "hello", 100))).await.unwrap();
        a.release().await;

        let (_a2, catchup) = registry.acquire(&room).await;
        assert_eq!(catchup.messages.len(), 1);
        assert_eq!(registry.room_stats(&room).await.unwrap().state, RoomState::Active);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let registry = Arc::new(RoomRegistry::new());
        let room = RoomId::new("R1");

        {
            let (_handle, _) = registry.acquire(&room).await;
            assert_eq!(registry.ref_count(&room).await, 1);
        }

        for _ in 0..50 {
            if registry.ref_count(&room).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(registry.ref_count(&room).await, 0);
    }
}
