//! Polling transport
//!
//! The fallback of last resort: a shared [`PollingStore`] holds each
//! room's messages and member last-seen times, and every client polls it
//! on a fixed interval. Each poll also counts as a presence refresh for
//! the polling client. Members silent for longer than the poller's
//! liveness window are dropped from the store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, TransportError};
use crate::message_log::MessageLog;
use crate::model::{Message, Participant, ParticipantId, RoomId, RosterEntry};

use super::{ConnectionStrategy, TransportEvent, TransportKind};

const DEFAULT_HISTORY: usize = 1000;
const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct PollRoom {
    log: MessageLog,
    /// Accepted messages tagged with their arrival sequence
    feed: VecDeque<(u64, Message)>,
    next_seq: u64,
    members: HashMap<ParticipantId, (Participant, Instant)>,
}

/// Result of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    /// Messages that arrived after the supplied cursor, in arrival order
    pub messages: Vec<Message>,
    /// Members seen within the window, excluding the poller
    pub roster: Vec<RosterEntry>,
    /// Cursor to pass to the next poll
    pub cursor: u64,
}

/// Shared state polled by [`PollingTransport`]s
#[derive(Debug)]
pub struct PollingStore {
    rooms: DashMap<RoomId, PollRoom>,
    history: usize,
}

impl Default for PollingStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl PollingStore {
    pub fn new(history: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            history: history.max(1),
        }
    }

    /// Store a message. Returns `false` if its id was already stored.
    pub fn push(&self, room: &RoomId, message: Message) -> bool {
        let mut entry = self.rooms.entry(room.clone()).or_default();
        if !entry.log.append(message.clone()) {
            return false;
        }

        entry.next_seq += 1;
        let seq = entry.next_seq;
        entry.feed.push_back((seq, message));
        while entry.feed.len() > self.history {
            entry.feed.pop_front();
        }
        true
    }

    /// Refresh a member's last-seen time
    pub fn touch(&self, room: &RoomId, participant: &Participant) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .members
            .insert(participant.id.clone(), (participant.clone(), Instant::now()));
    }

    /// Remove a member. The room goes with its last member.
    pub fn leave(&self, room: &RoomId, id: &ParticipantId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.members.remove(id);
        }
        self.rooms.remove_if(room, |_, entry| entry.members.is_empty());
    }

    /// Drop members silent for longer than `window`, and rooms left
    /// without members. Returns the number of rooms removed.
    pub fn prune(&self, window: Duration) -> usize {
        let now = Instant::now();
        let before = self.rooms.len();
        self.rooms.retain(|_, entry| {
            entry
                .members
                .retain(|_, (_, seen)| now.duration_since(*seen) <= window);
            !entry.members.is_empty()
        });
        before.saturating_sub(self.rooms.len())
    }

    /// Poll as `local`: refresh its presence and return what changed
    /// after `cursor`
    ///
    /// Members silent for longer than `window` are forgotten.
    pub fn poll(
        &self,
        room: &RoomId,
        local: &Participant,
        cursor: u64,
        window: Duration,
    ) -> PollSnapshot {
        let now = Instant::now();
        let mut entry = self.rooms.entry(room.clone()).or_default();
        entry
            .members
            .insert(local.id.clone(), (local.clone(), now));
        entry
            .members
            .retain(|_, (_, seen)| now.duration_since(*seen) <= window);

        let messages = entry
            .feed
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .map(|(_, m)| m.clone())
            .collect();

        let mut roster: Vec<RosterEntry> = entry
            .members
            .values()
            .filter(|(p, _)| p.id != local.id)
            .map(|(p, seen)| RosterEntry::idle(p.clone(), now.duration_since(*seen)))
            .collect();
        roster.sort_by(|a, b| a.participant.id.cmp(&b.participant.id));

        PollSnapshot {
            messages,
            roster,
            cursor: entry.next_seq,
        }
    }

    /// All stored messages of a room in replicated order
    pub fn messages(&self, room: &RoomId) -> Vec<Message> {
        self.rooms
            .get(room)
            .map(|e| e.log.snapshot())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|e| e.members.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

struct PollLink {
    room: RoomId,
    local: Participant,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Transport that polls a [`PollingStore`]
pub struct PollingTransport {
    store: Arc<PollingStore>,
    interval: Duration,
    window: Duration,
    link: Option<PollLink>,
}

impl PollingTransport {
    pub fn new(store: Arc<PollingStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            window: DEFAULT_WINDOW,
            link: None,
        }
    }

    /// Forget members silent for longer than `window`
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl ConnectionStrategy for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|l| !l.task.is_finished())
    }

    async fn connect(
        &mut self,
        room: &RoomId,
        local: &Participant,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        self.disconnect().await;

        let pruned = self.store.prune(self.window);
        if pruned > 0 {
            tracing::debug!(rooms = pruned, "Pruned abandoned polling rooms");
        }
        let first = self.store.poll(room, local, 0, self.window);
        if !first.messages.is_empty() {
            let _ = events.send(TransportEvent::Messages(first.messages)).await;
        }
        let _ = events.send(TransportEvent::Roster(first.roster)).await;
        let _ = events
            .send(TransportEvent::Connected(TransportKind::Polling))
            .await;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.store),
            room.clone(),
            local.clone(),
            first.cursor,
            self.interval,
            self.window,
            shutdown_rx,
            events,
        ));

        tracing::debug!(room = %room, interval_ms = self.interval.as_millis() as u64, "Polling transport connected");

        self.link = Some(PollLink {
            room: room.clone(),
            local: local.clone(),
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        self.store.push(&link.room, message.clone());
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        self.store.touch(&link.room, &link.local);
        Ok(())
    }

    async fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        if let Some(shutdown) = link.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = link.task.await;
        self.store.leave(&link.room, &link.local.id);

        tracing::debug!(room = %link.room, "Polling transport disconnected");
    }
}

async fn poll_loop(
    store: Arc<PollingStore>,
    room: RoomId,
    local: Participant,
    mut cursor: u64,
    period: Duration,
    window: Duration,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::Sender<TransportEvent>,
) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let snapshot = store.poll(&room, &local, cursor, window);
                cursor = snapshot.cursor;

                if !snapshot.messages.is_empty()
                    && events.send(TransportEvent::Messages(snapshot.messages)).await.is_err()
                {
                    break;
                }
                if events.send(TransportEvent::Roster(snapshot.roster)).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn msg(client: &str, ts: u64) -> Message {
        Message::compose(client, &Participant::new(client, client), "x", ts)
    }

    #[test]
    fn test_store_cursor_and_dedup() {
        let store = PollingStore::default();
        let room = RoomId::new("r");
        let me = Participant::new("me", "Me");

        assert!(store.push(&room, msg("a", 10)));
        assert!(!store.push(&room, msg("a", 10)));

        let first = store.poll(&room, &me, 0, WINDOW);
        assert_eq!(first.messages.len(), 1);

        // Arrival order is tracked independently of timestamps
        store.push(&room, msg("b", 5));
        let second = store.poll(&room, &me, first.cursor, WINDOW);
        assert_eq!(second.messages, vec![msg("b", 5)]);
        assert!(store.poll(&room, &me, second.cursor, WINDOW).messages.is_empty());

        assert_eq!(store.messages(&room)[0].timestamp, 5);
    }

    #[test]
    fn test_roster_excludes_poller_and_stale() {
        let store = PollingStore::default();
        let room = RoomId::new("r");
        let me = Participant::new("me", "Me");

        store.touch(&room, &Participant::new("bob", "Bob"));
        std::thread::sleep(Duration::from_millis(5));
        let roster = store.poll(&room, &me, 0, WINDOW).roster;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].participant.id.as_str(), "bob");
        assert!(roster[0].idle_for() >= Duration::from_millis(5));

        // A poller with a shorter window drops the silent member for good
        assert!(store.poll(&room, &me, 0, Duration::from_millis(1)).roster.is_empty());
        assert_eq!(store.member_count(&room), 1);

        store.touch(&room, &Participant::new("bob", "Bob"));
        store.leave(&room, &ParticipantId::new("bob"));
        assert!(store.poll(&room, &me, 0, WINDOW).roster.is_empty());
        assert_eq!(store.member_count(&room), 1);
    }

    #[test]
    fn test_rooms_removed_with_last_member() {
        let store = PollingStore::default();
        let room = RoomId::new("r");
        let me = Participant::new("me", "Me");

        store.push(&room, msg("a", 1));
        store.poll(&room, &me, 0, WINDOW);
        store.leave(&room, &me.id);
        assert_eq!(store.room_count(), 0);

        // Crashed pollers never leave; pruning catches them
        store.touch(&RoomId::new("abandoned"), &Participant::new("ghost", "Ghost"));
        store.touch(&room, &me);
        std::thread::sleep(Duration::from_millis(20));
        store.touch(&room, &me);
        assert_eq!(store.prune(Duration::from_millis(10)), 1);
        assert_eq!(store.room_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_polls_store() {
        let store = Arc::new(PollingStore::default());
        let room = RoomId::new("r");
        let mut transport = PollingTransport::new(Arc::clone(&store), Duration::from_millis(20));
        let (tx, mut rx) = mpsc::channel(16);

        transport
            .connect(&room, &Participant::new("me", "Me"), tx)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Roster(vec![])));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Connected(TransportKind::Polling))
        );

        store.push(&room, msg("bob", 42));
        let got = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(TransportEvent::Messages(m)) = rx.recv().await {
                    return m;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(got, vec![msg("bob", 42)]);

        transport.disconnect().await;
        assert!(!transport.is_connected());
        assert_eq!(store.member_count(&room), 0);
        assert_eq!(store.room_count(), 0);
    }
}
