//! Per-room background task
//!
//! Owns the active transport of one room. It applies transport events to
//! the shared [`RoomState`], forwards locally composed messages, drives
//! heartbeats and presence sweeps, and moves down the preference order when
//! the active transport gives up. When no transport can be reached at all
//! it retries the whole order with linear backoff, and after the last round
//! it idles until asked to [`Retry`](Command::Retry).
//!
//! Call membership survives reconnects: every time a transport comes up
//! while the session is in the call, the call is entered again.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;

use crate::model::{Message, Participant, RoomId};
use crate::peer::SignalMessage;
use crate::transport::{
    ConnectionStrategy, Transport, TransportEvent, TransportKind, TransportResources,
};

use super::config::SyncConfig;
use super::state::{ConnectionStatus, RoomState, SessionEvent};

/// Requests from the session handle
#[derive(Debug)]
pub(crate) enum Command {
    Send(Message),
    JoinCall,
    LeaveCall,
    Signal(SignalMessage),
    /// Start over if every transport was given up on
    Retry,
    Shutdown,
}

pub(crate) struct Pump {
    room: RoomId,
    local: Participant,
    config: SyncConfig,
    resources: TransportResources,
    state: Arc<RwLock<RoomState>>,
    observers: broadcast::Sender<SessionEvent>,
    commands: mpsc::Receiver<Command>,

    transport: Option<Transport>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Transports not yet tried in this round
    candidates: VecDeque<TransportKind>,
    /// Whether the active transport lost its link and has not recovered
    link_lost: bool,
    /// Full rounds that found no usable transport
    failed_rounds: u32,
    retry_at: Option<Instant>,
    in_call: bool,
}

impl Pump {
    pub(crate) fn new(
        room: RoomId,
        local: Participant,
        config: SyncConfig,
        resources: TransportResources,
        state: Arc<RwLock<RoomState>>,
        observers: broadcast::Sender<SessionEvent>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let candidates = config.transport_order.iter().copied().collect();
        Self {
            room,
            local,
            config,
            resources,
            state,
            observers,
            commands,
            transport: None,
            events: None,
            candidates,
            link_lost: false,
            failed_rounds: 0,
            retry_at: None,
            in_call: false,
        }
    }

    pub(crate) async fn run(mut self) {
        self.establish().await;

        let period = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(message)) => self.deliver(message).await,
                    Some(Command::JoinCall) => {
                        self.in_call = true;
                        self.enter_call().await;
                    }
                    Some(Command::LeaveCall) => self.exit_call().await,
                    Some(Command::Signal(signal)) => self.signal(signal).await,
                    Some(Command::Retry) => self.retry().await,
                    Some(Command::Shutdown) | None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.apply(event).await,
                    None => self.abandon_transport().await,
                },
                _ = ticker.tick() => self.tick().await,
                _ = sleep_until(self.retry_at) => self.establish().await,
            }
        }

        self.drop_transport().await;
        tracing::debug!(room = %self.room, "Room pump stopped");
    }

    /// Try the remaining candidates in order; first viable one wins
    async fn establish(&mut self) {
        self.retry_at = None;
        self.set_status(ConnectionStatus::Connecting, None).await;

        let first_choice = self.config.transport_order.first().copied();
        while let Some(kind) = self.candidates.pop_front() {
            let Some(mut transport) = Transport::build(kind, &self.resources, &self.config) else {
                tracing::debug!(room = %self.room, transport = %kind, "Transport unavailable");
                continue;
            };

            let (tx, rx) = mpsc::channel(self.config.event_capacity);
            match transport.connect(&self.room, &self.local, tx).await {
                Ok(()) => {
                    tracing::info!(room = %self.room, transport = %kind, "Transport selected");
                    if Some(kind) != first_choice {
                        self.state.write().await.stats.fallbacks += 1;
                    }
                    self.transport = Some(transport);
                    self.events = Some(rx);
                    self.failed_rounds = 0;
                    return;
                }
                Err(e) => {
                    tracing::warn!(room = %self.room, transport = %kind, error = %e, "Transport failed to connect");
                }
            }
        }

        self.failed_rounds += 1;
        if self.failed_rounds > self.config.max_reconnect_attempts {
            tracing::warn!(
                room = %self.room,
                rounds = self.failed_rounds,
                "No transport reachable, giving up"
            );
            self.set_status(ConnectionStatus::Offline, None).await;
            return;
        }

        let delay = self
            .config
            .reconnect_base_delay
            .saturating_mul(self.failed_rounds);
        tracing::info!(
            room = %self.room,
            attempt = self.failed_rounds,
            delay_ms = delay.as_millis() as u64,
            "No transport reachable, retrying"
        );
        self.candidates = self.config.transport_order.iter().copied().collect();
        self.retry_at = Some(Instant::now() + delay);
        self.set_status(ConnectionStatus::Offline, None).await;
    }

    async fn apply(&mut self, event: TransportEvent) {
        let Some(source) = self.transport.as_ref().map(|t| t.kind()) else {
            return;
        };

        match event {
            TransportEvent::Connected(kind) => {
                if self.link_lost {
                    self.state.write().await.stats.reconnects += 1;
                    self.link_lost = false;
                }
                self.set_status(ConnectionStatus::Connected, Some(kind)).await;
                self.flush_outbox().await;
                if self.in_call {
                    self.enter_call().await;
                }
            }
            TransportEvent::Disconnected { kind, permanent: false } => {
                tracing::info!(room = %self.room, transport = %kind, "Transport link lost, awaiting reconnect");
                self.link_lost = true;
                self.set_status(ConnectionStatus::Connecting, Some(kind)).await;
            }
            TransportEvent::Disconnected { kind, permanent: true } => {
                tracing::warn!(room = %self.room, transport = %kind, "Transport gave up");
                self.abandon_transport().await;
            }
            TransportEvent::Messages(batch) => {
                let total = batch.len();
                let mut state = self.state.write().await;
                let added = state.log.merge(batch);
                state.stats.record_received(total, added.len());
                drop(state);

                if !added.is_empty() {
                    tracing::debug!(room = %self.room, added = added.len(), "Messages merged");
                    self.notify(SessionEvent::MessagesAdded(added));
                }
            }
            TransportEvent::PresenceJoined(participant) => {
                let mut state = self.state.write().await;
                if state.presence.heartbeat(source, participant) {
                    let roster = state.presence.online();
                    drop(state);
                    self.notify(SessionEvent::PresenceChanged(roster));
                }
            }
            TransportEvent::PresenceLeft(id) => {
                let mut state = self.state.write().await;
                if state.presence.leave(source, &id).is_some() {
                    let roster = state.presence.online();
                    drop(state);
                    self.notify(SessionEvent::PresenceChanged(roster));
                }
            }
            TransportEvent::Roster(roster) => {
                let mut state = self.state.write().await;
                let delta = state.presence.replace_roster(source, roster);
                if !delta.is_empty() {
                    let roster = state.presence.online();
                    drop(state);
                    self.notify(SessionEvent::PresenceChanged(roster));
                }
            }
            TransportEvent::ExistingPeers(peers) => {
                tracing::debug!(room = %self.room, peers = peers.len(), "Entered call");
                self.notify(SessionEvent::ExistingPeers(peers));
            }
            TransportEvent::NewPeer(peer) => self.notify(SessionEvent::NewPeer(peer)),
            TransportEvent::Signal(signal) => self.notify(SessionEvent::Signal(signal)),
        }
    }

    async fn enter_call(&mut self) {
        let Some(transport) = self.transport.as_mut().filter(|t| t.is_connected()) else {
            tracing::debug!(room = %self.room, "Joining call once connected");
            return;
        };
        if let Err(e) = transport.join_call().await {
            tracing::warn!(room = %self.room, error = %e, "Failed to join call");
        }
    }

    async fn exit_call(&mut self) {
        if !std::mem::replace(&mut self.in_call, false) {
            return;
        }
        if let Some(transport) = self.transport.as_mut().filter(|t| t.is_connected()) {
            if let Err(e) = transport.leave_call().await {
                tracing::debug!(room = %self.room, error = %e, "Failed to leave call");
            }
        }
    }

    /// Signals are not queued; a negotiation is restarted after reconnect
    async fn signal(&mut self, signal: SignalMessage) {
        let Some(transport) = self.transport.as_mut().filter(|t| t.is_connected()) else {
            tracing::debug!(room = %self.room, signal = signal.name(), "No transport, signal dropped");
            return;
        };
        if let Err(e) = transport.signal(&signal).await {
            tracing::debug!(room = %self.room, signal = signal.name(), error = %e, "Signal failed");
        }
    }

    async fn retry(&mut self) {
        if self.transport.is_some() || self.retry_at.is_some() {
            return;
        }
        tracing::info!(room = %self.room, "Retrying transports");
        self.failed_rounds = 0;
        self.candidates = self.config.transport_order.iter().copied().collect();
        self.establish().await;
    }

    /// Forward a message, or queue it until a transport can take it
    async fn deliver(&mut self, message: Message) {
        if let Some(transport) = self.transport.as_mut().filter(|t| t.is_connected()) {
            match transport.send(&message).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::debug!(room = %self.room, message = %message.id, error = %e, "Send failed, queueing");
                }
            }
        }
        self.state.write().await.enqueue(message);
    }

    async fn flush_outbox(&mut self) {
        let pending: Vec<Message> = {
            let mut state = self.state.write().await;
            let drained = state.outbox.drain(..).collect();
            state.stats.queued = 0;
            drained
        };
        if pending.is_empty() {
            return;
        }

        tracing::info!(room = %self.room, count = pending.len(), "Flushing outbox");
        let Some(transport) = self.transport.as_mut() else {
            let mut state = self.state.write().await;
            pending.into_iter().for_each(|m| state.enqueue(m));
            return;
        };

        let mut unsent = Vec::new();
        for message in pending {
            if !unsent.is_empty() {
                unsent.push(message);
                continue;
            }
            if let Err(e) = transport.send(&message).await {
                tracing::debug!(room = %self.room, error = %e, "Flush interrupted");
                unsent.push(message);
            }
        }

        if !unsent.is_empty() {
            let mut state = self.state.write().await;
            for message in unsent.into_iter().rev() {
                state.outbox.push_front(message);
            }
            state.stats.queued = state.outbox.len() as u64;
        }
    }

    async fn tick(&mut self) {
        if let Some(transport) = self.transport.as_mut().filter(|t| t.is_connected()) {
            if let Err(e) = transport.heartbeat().await {
                tracing::debug!(room = %self.room, error = %e, "Heartbeat failed");
            }
        }

        let mut state = self.state.write().await;
        let departed = state.presence.sweep();
        if !departed.is_empty() {
            let roster = state.presence.online();
            drop(state);
            for participant in &departed {
                tracing::info!(room = %self.room, participant = %participant.id, "Participant timed out");
            }
            self.notify(SessionEvent::PresenceChanged(roster));
        }
    }

    /// Drop the active transport and move on to the next candidate
    async fn abandon_transport(&mut self) {
        self.drop_transport().await;
        self.link_lost = false;
        self.establish().await;
    }

    async fn drop_transport(&mut self) {
        self.events = None;
        let Some(mut transport) = self.transport.take() else {
            return;
        };

        let kind = transport.kind();
        transport.disconnect().await;

        let mut state = self.state.write().await;
        let departed = state.presence.clear_source(kind);
        if !departed.is_empty() {
            let roster = state.presence.online();
            drop(state);
            self.notify(SessionEvent::PresenceChanged(roster));
        }
    }

    async fn set_status(&self, status: ConnectionStatus, method: Option<TransportKind>) {
        let mut state = self.state.write().await;
        if state.status == status && state.method == method {
            return;
        }
        state.status = status;
        state.method = method;
        let event = state.status_event();
        drop(state);
        self.notify(event);
    }

    fn notify(&self, event: SessionEvent) {
        // No observers is fine
        let _ = self.observers.send(event);
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
