//! Relay-side room state
//!
//! The relay is authoritative for the rooms it serves: it keeps each
//! room's log and membership, issues ids for messages that arrive without
//! one, and fans accepted messages out to every member. It also routes call
//! signaling between the members of a room's call.
//!
//! Rosters report how long each member has been silent, so clients apply
//! their own liveness window. A member whose outbound queue is full is
//! evicted rather than silently missing frames; its connection closes and
//! the client rejoins with a fresh room state. A room is dropped with its
//! last member.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify, RwLock};

use crate::message_log::MessageLog;
use crate::model::{now_millis, Message, MessageId, Participant, ParticipantId, RoomId, RosterEntry};
use crate::peer::SignalMessage;

use super::frame::RelayFrame;

/// Outbound side of one connection, as the rooms see it
#[derive(Debug, Clone)]
pub struct MemberLink {
    tx: mpsc::Sender<RelayFrame>,
    evicted: Arc<Notify>,
}

impl MemberLink {
    pub fn new(tx: mpsc::Sender<RelayFrame>) -> Self {
        Self {
            tx,
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Fires when the relay cuts this connection loose
    pub fn evicted(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }
}

struct Member {
    user: Participant,
    link: MemberLink,
    last_seen: Instant,
    in_call: bool,
}

struct RelayRoom {
    id: RoomId,
    log: MessageLog,
    /// Members keyed by connection session id
    members: HashMap<u64, Member>,
}

impl RelayRoom {
    fn new(id: RoomId, history: usize) -> Self {
        Self {
            id,
            log: MessageLog::with_capacity(history),
            members: HashMap::new(),
        }
    }

    fn member(&mut self, session_id: u64) -> Result<&mut Member, String> {
        self.members
            .get_mut(&session_id)
            .ok_or_else(|| "not a member of this room".to_string())
    }

    /// Online users, one entry per participant id
    ///
    /// A participant connected more than once reports its freshest
    /// connection.
    fn roster(&self) -> Vec<RosterEntry> {
        let now = Instant::now();
        let mut unique: BTreeMap<&ParticipantId, (&Participant, Instant)> = BTreeMap::new();
        for member in self.members.values() {
            let slot = unique
                .entry(&member.user.id)
                .or_insert((&member.user, member.last_seen));
            if member.last_seen > slot.1 {
                *slot = (&member.user, member.last_seen);
            }
        }
        unique
            .into_values()
            .map(|(user, seen)| RosterEntry::idle(user.clone(), now.saturating_duration_since(seen)))
            .collect()
    }

    /// Call members other than `user`, sorted and deduplicated
    fn call_peers(&self, user: &ParticipantId) -> Vec<ParticipantId> {
        let peers: BTreeSet<&ParticipantId> = self
            .members
            .values()
            .filter(|m| m.in_call && m.user.id != *user)
            .map(|m| &m.user.id)
            .collect();
        peers.into_iter().cloned().collect()
    }

    /// Queue a frame for every member `targets` accepts
    ///
    /// Returns how many members it was queued for. Members with a full
    /// queue are evicted.
    fn fan_out<F>(&mut self, frame: RelayFrame, targets: F) -> usize
    where
        F: Fn(u64, &Member) -> bool,
    {
        let mut delivered = 0;
        let mut slow = Vec::new();
        for (session_id, member) in &self.members {
            if !targets(*session_id, member) {
                continue;
            }
            match member.link.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => slow.push(*session_id),
                // Connection already ending; its own leave cleans up
                Err(TrySendError::Closed(_)) => {}
            }
        }

        for session_id in slow {
            self.evict(session_id, frame.name());
        }
        delivered
    }

    fn evict(&mut self, session_id: u64, frame: &'static str) {
        let Some(member) = self.members.remove(&session_id) else {
            return;
        };
        tracing::warn!(
            session_id = session_id,
            user = %member.user.id,
            frame = frame,
            "Outbound queue full, evicting member"
        );
        member.link.evicted.notify_one();
        self.announce_departure(&member);
    }

    fn announce_departure(&mut self, member: &Member) {
        if member.in_call {
            let from = member.user.id.clone();
            let signal = RelayFrame::Signal {
                room: self.id.clone(),
                signal: SignalMessage::PeerLeft { from: from.clone() },
            };
            self.fan_out(signal, |_, m| m.in_call && m.user.id != from);
        }

        let online_users = self.roster();
        self.fan_out(
            RelayFrame::UserLeft {
                user: member.user.clone(),
                online_users,
            },
            |_, _| true,
        );
    }
}

/// All rooms served by one relay
pub struct RelayRooms {
    rooms: RwLock<HashMap<RoomId, RelayRoom>>,
    history: usize,
    next_message_seq: AtomicU64,
    messages_relayed: AtomicU64,
    members_evicted: AtomicU64,
}

impl RelayRooms {
    pub fn new(history: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            history,
            next_message_seq: AtomicU64::new(1),
            messages_relayed: AtomicU64::new(0),
            members_evicted: AtomicU64::new(0),
        }
    }

    /// Add a member and announce it to the others
    ///
    /// Returns the room's messages and roster for the joiner.
    pub async fn join(
        &self,
        session_id: u64,
        room: &RoomId,
        user: Participant,
        link: MemberLink,
    ) -> (Vec<Message>, Vec<RosterEntry>) {
        let mut rooms = self.rooms.write().await;
        let state = rooms
            .entry(room.clone())
            .or_insert_with(|| RelayRoom::new(room.clone(), self.history));

        state.members.insert(
            session_id,
            Member {
                user: user.clone(),
                link,
                last_seen: Instant::now(),
                in_call: false,
            },
        );

        let roster = state.roster();
        let before = state.members.len();
        state.fan_out(
            RelayFrame::UserJoined {
                user: user.clone(),
                online_users: roster.clone(),
            },
            |id, _| id != session_id,
        );
        let evicted = before - state.members.len();

        tracing::info!(
            room = %room,
            session_id = session_id,
            user = %user.id,
            members = state.members.len(),
            "Member joined"
        );

        let snapshot = (state.log.snapshot(), state.roster());
        self.settle(&mut rooms, room, evicted);
        snapshot
    }

    /// Remove a member and announce the departure
    pub async fn leave(&self, session_id: u64, room: &RoomId) -> Option<Participant> {
        let mut rooms = self.rooms.write().await;
        let state = rooms.get_mut(room)?;
        let member = state.members.remove(&session_id)?;

        let before = state.members.len();
        state.announce_departure(&member);
        let evicted = before - state.members.len();

        tracing::info!(
            room = %room,
            session_id = session_id,
            user = %member.user.id,
            members = state.members.len(),
            "Member left"
        );

        self.settle(&mut rooms, room, evicted);
        Some(member.user)
    }

    /// Refresh a member's last-seen time and return the roster
    pub async fn ping(&self, session_id: u64, room: &RoomId) -> Vec<RosterEntry> {
        let mut rooms = self.rooms.write().await;
        let Some(state) = rooms.get_mut(room) else {
            return Vec::new();
        };
        if let Ok(member) = state.member(session_id) {
            member.last_seen = Instant::now();
        }
        state.roster()
    }

    /// Accept a message from a member and fan it out
    ///
    /// Returns `Ok(None)` for a duplicate id, which is not re-broadcast.
    pub async fn post(
        &self,
        session_id: u64,
        room: &RoomId,
        id: Option<MessageId>,
        body: &str,
        timestamp: Option<u64>,
    ) -> Result<Option<Message>, String> {
        let body = body.trim();
        if body.is_empty() {
            return Err("message body is empty".to_string());
        }

        let mut rooms = self.rooms.write().await;
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| format!("unknown room {}", room))?;
        let member = state.member(session_id)?;
        member.last_seen = Instant::now();
        let author = member.user.clone();

        let timestamp = timestamp.unwrap_or_else(now_millis);
        let id = id.unwrap_or_else(|| {
            let seq = self.next_message_seq.fetch_add(1, Ordering::Relaxed);
            MessageId::new(format!("relay:{}", seq))
        });

        let message = Message {
            id,
            author_id: author.id.clone(),
            author: author.display_name,
            body: body.to_string(),
            timestamp,
        };

        if !state.log.append(message.clone()) {
            tracing::debug!(room = %room, id = %message.id, "Duplicate message ignored");
            return Ok(None);
        }

        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
        let before = state.members.len();
        state.fan_out(
            RelayFrame::NewMessage {
                message: message.clone(),
            },
            |_, _| true,
        );
        let evicted = before - state.members.len();

        self.settle(&mut rooms, room, evicted);
        Ok(Some(message))
    }

    /// Enter the room's call
    ///
    /// Returns the call members already present. The others hear about the
    /// newcomer; joining again only repeats the reply.
    pub async fn join_call(&self, session_id: u64, room: &RoomId) -> Result<Vec<ParticipantId>, String> {
        let mut rooms = self.rooms.write().await;
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| format!("unknown room {}", room))?;
        let member = state.member(session_id)?;
        member.last_seen = Instant::now();
        let user = member.user.id.clone();
        let rejoin = std::mem::replace(&mut member.in_call, true);

        let peers = state.call_peers(&user);
        let mut evicted = 0;
        if !rejoin {
            let before = state.members.len();
            state.fan_out(RelayFrame::NewPeer { peer: user.clone() }, |_, m| {
                m.in_call && m.user.id != user
            });
            evicted = before - state.members.len();
            tracing::info!(room = %room, user = %user, existing = peers.len(), "Member joined call");
        }

        self.settle(&mut rooms, room, evicted);
        Ok(peers)
    }

    /// Leave the room's call, telling the remaining call members
    pub async fn leave_call(&self, session_id: u64, room: &RoomId) -> Result<(), String> {
        let mut rooms = self.rooms.write().await;
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| format!("unknown room {}", room))?;
        let member = state.member(session_id)?;
        if !std::mem::replace(&mut member.in_call, false) {
            return Ok(());
        }
        let from = member.user.id.clone();

        let before = state.members.len();
        let signal = RelayFrame::Signal {
            room: room.clone(),
            signal: SignalMessage::PeerLeft { from: from.clone() },
        };
        state.fan_out(signal, |_, m| m.in_call && m.user.id != from);
        let evicted = before - state.members.len();

        tracing::info!(room = %room, user = %from, "Member left call");
        self.settle(&mut rooms, room, evicted);
        Ok(())
    }

    /// Route a signaling message from a member
    ///
    /// Addressed signals reach every connection of the addressee; the rest
    /// go to the other call members. The sender must sign as itself.
    /// Returns the number of connections reached.
    pub async fn signal(
        &self,
        session_id: u64,
        room: &RoomId,
        signal: SignalMessage,
    ) -> Result<usize, String> {
        let mut rooms = self.rooms.write().await;
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| format!("unknown room {}", room))?;
        let member = state.member(session_id)?;
        if *signal.from() != member.user.id {
            return Err(format!("{} signal not sent as {}", signal.name(), member.user.id));
        }
        member.last_seen = Instant::now();

        let from = member.user.id.clone();
        let to = signal.to().cloned();
        let frame = RelayFrame::Signal {
            room: room.clone(),
            signal,
        };

        let before = state.members.len();
        let delivered = match &to {
            Some(to) => state.fan_out(frame, |id, m| id != session_id && m.user.id == *to),
            None => state.fan_out(frame, |_, m| m.in_call && m.user.id != from),
        };
        let evicted = before - state.members.len();
        self.settle(&mut rooms, room, evicted);

        match to {
            Some(to) if delivered == 0 => Err(format!("peer {} is not in this room", to)),
            _ => Ok(delivered),
        }
    }

    /// Account for evictions and drop the room once it is empty
    fn settle(&self, rooms: &mut HashMap<RoomId, RelayRoom>, room: &RoomId, evicted: usize) {
        if evicted > 0 {
            self.members_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        if rooms.get(room).is_some_and(|r| r.members.is_empty()) {
            rooms.remove(room);
            tracing::debug!(room = %room, "Room emptied, dropped");
        }
    }

    /// Current roster of a room
    pub async fn roster(&self, room: &RoomId) -> Vec<RosterEntry> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.roster())
            .unwrap_or_default()
    }

    /// Messages currently held for a room
    pub async fn messages(&self, room: &RoomId) -> Vec<Message> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.log.snapshot())
            .unwrap_or_default()
    }

    /// Number of connections joined to a room
    pub async fn member_count(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|r| r.members.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Messages accepted since startup
    pub fn messages_relayed(&self) -> u64 {
        self.messages_relayed.load(Ordering::Relaxed)
    }

    /// Members cut loose for falling behind, since startup
    pub fn members_evicted(&self) -> u64 {
        self.members_evicted.load(Ordering::Relaxed)
    }
}
