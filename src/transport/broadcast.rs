//! In-process broadcast transport
//!
//! Every client of a room holds a [`RoomHandle`] on the same
//! [`RoomRegistry`]. Messages and awareness states fan out through the
//! room's broadcast channel; a newly acquired handle receives the room's
//! cached messages and current awareness states as catch-up.
//!
//! Call signaling rides the same channel; each link drops signals
//! addressed to another participant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, TransportError};
use crate::model::{Message, Participant, ParticipantId, RoomId, RosterEntry};
use crate::peer::SignalMessage;
use crate::registry::{Envelope, Payload, Received, RoomHandle, RoomRegistry};

use super::{ConnectionStrategy, TransportEvent, TransportKind};

struct BroadcastLink {
    room: RoomId,
    local: Participant,
    handle_id: u64,
    connected: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Transport backed by a shared [`RoomRegistry`]
pub struct BroadcastTransport {
    registry: Arc<RoomRegistry>,
    link: Option<BroadcastLink>,
}

impl BroadcastTransport {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            link: None,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    async fn publish(&self, payload: Payload) -> Result<()> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if !link.connected.load(Ordering::Relaxed) {
            return Err(TransportError::NotConnected.into());
        }
        self.registry
            .publish(&link.room, Envelope::new(link.handle_id, payload))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionStrategy for BroadcastTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broadcast
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.connected.load(Ordering::Relaxed))
    }

    async fn connect(
        &mut self,
        room: &RoomId,
        local: &Participant,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        self.disconnect().await;

        let (handle, catchup) = self.registry.acquire(room).await;
        let handle_id = handle.id();

        if let Err(e) = handle.publish(Payload::Awareness(local.clone())).await {
            handle.release().await;
            return Err(e.into());
        }

        if !catchup.messages.is_empty() {
            let _ = events.send(TransportEvent::Messages(catchup.messages)).await;
        }
        let roster = catchup.awareness.into_iter().map(RosterEntry::fresh).collect();
        let _ = events.send(TransportEvent::Roster(roster)).await;
        let _ = events
            .send(TransportEvent::Connected(TransportKind::Broadcast))
            .await;

        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_link(
            handle,
            local.id.clone(),
            shutdown_rx,
            events.clone(),
            Arc::clone(&connected),
        ));

        tracing::debug!(room = %room, handle = handle_id, "Broadcast transport connected");

        self.link = Some(BroadcastLink {
            room: room.clone(),
            local: local.clone(),
            handle_id,
            connected,
            events,
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        self.publish(Payload::Message(message.clone())).await
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let local = match &self.link {
            Some(link) => link.local.clone(),
            None => return Err(TransportError::NotConnected.into()),
        };
        self.publish(Payload::Awareness(local)).await
    }

    async fn join_call(&mut self) -> Result<()> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        let peers = self
            .registry
            .join_call(&link.room, link.handle_id, link.local.id.clone())
            .await?;
        tracing::debug!(room = %link.room, existing = peers.len(), "Joined call");
        link.events
            .send(TransportEvent::ExistingPeers(peers))
            .await
            .map_err(|_| TransportError::NotConnected)?;
        Ok(())
    }

    async fn leave_call(&mut self) -> Result<()> {
        let from = match &self.link {
            Some(link) => link.local.id.clone(),
            None => return Err(TransportError::NotConnected.into()),
        };
        self.publish(Payload::Signal(SignalMessage::PeerLeft { from })).await
    }

    async fn signal(&mut self, signal: &SignalMessage) -> Result<()> {
        self.publish(Payload::Signal(signal.clone())).await
    }

    async fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };

        link.connected.store(false, Ordering::Relaxed);
        if let Some(shutdown) = link.shutdown.take() {
            let _ = shutdown.send(());
        }
        // The task releases the handle on its way out
        if let Err(e) = link.task.await {
            tracing::warn!(room = %link.room, error = %e, "Broadcast task failed");
        }

        tracing::debug!(room = %link.room, handle = link.handle_id, "Broadcast transport disconnected");
    }
}

async fn run_link(
    mut handle: RoomHandle,
    local_id: ParticipantId,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = handle.recv() => {
                let Some(received) = received else {
                    connected.store(false, Ordering::Relaxed);
                    let _ = events
                        .send(TransportEvent::Disconnected {
                            kind: TransportKind::Broadcast,
                            permanent: true,
                        })
                        .await;
                    break;
                };
                if !forward(received, &local_id, &events).await {
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    handle.release().await;
}

/// Translate registry traffic into transport events
///
/// Returns `false` once the event receiver is gone.
async fn forward(
    received: Received,
    local_id: &ParticipantId,
    events: &mpsc::Sender<TransportEvent>,
) -> bool {
    let event = match received {
        Received::Envelope(envelope) => match envelope.payload {
            Payload::Message(message) => TransportEvent::Messages(vec![message]),
            Payload::Awareness(participant) => TransportEvent::PresenceJoined(participant),
            Payload::Departed(id) => TransportEvent::PresenceLeft(id),
            Payload::Signal(signal) => {
                if signal.to().is_some_and(|to| to != local_id) {
                    return true;
                }
                TransportEvent::Signal(signal)
            }
            Payload::CallJoined(id) => TransportEvent::NewPeer(id),
        },
        Received::Resync(catchup) => {
            if events
                .send(TransportEvent::Messages(catchup.messages))
                .await
                .is_err()
            {
                return false;
            }
            TransportEvent::Roster(catchup.awareness.into_iter().map(RosterEntry::fresh).collect())
        }
    };
    events.send(event).await.is_ok()
}
