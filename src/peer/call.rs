//! Call bridge
//!
//! Connects a [`PeerConnectionManager`] to a [`SyncSession`]: session events
//! open, negotiate and drop peer connections, and the manager's outbound
//! signaling is handed back to the session for delivery.

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::ParticipantId;
use crate::session::{SessionEvent, SyncSession};

use super::error::PeerError;
use super::manager::PeerConnectionManager;
use super::signal::SignalMessage;

pub struct CallBridge {
    manager: PeerConnectionManager,
    outbound: mpsc::UnboundedReceiver<SignalMessage>,
}

impl CallBridge {
    pub fn new(local_id: ParticipantId) -> Self {
        let (manager, outbound) = PeerConnectionManager::new(local_id);
        Self { manager, outbound }
    }

    pub fn manager(&self) -> &PeerConnectionManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut PeerConnectionManager {
        &mut self.manager
    }

    /// Apply one session event to the peer mesh
    ///
    /// Entering the call offers to everyone already there, replacing any
    /// connection left over from before a reconnect. Members that drop off
    /// the roster lose their connection, and leaving the room closes all.
    pub fn apply(&mut self, event: &SessionEvent) -> std::result::Result<(), PeerError> {
        match event {
            SessionEvent::ExistingPeers(peers) => {
                for peer in peers {
                    self.manager.remove_peer(peer);
                    self.manager.add_peer(peer.clone(), true)?;
                }
            }
            SessionEvent::NewPeer(peer) => {
                self.manager.add_peer(peer.clone(), false)?;
            }
            SessionEvent::Signal(signal) => self.manager.handle_signal(signal.clone())?,
            SessionEvent::PresenceChanged(roster) => {
                let online: HashSet<&ParticipantId> = roster.iter().map(|p| &p.id).collect();
                for peer in self.manager.peer_ids() {
                    if !online.contains(&peer) {
                        tracing::debug!(peer = %peer, "Peer went offline");
                        self.manager.remove_peer(&peer);
                    }
                }
            }
            SessionEvent::RoomChanged(_) => self.manager.close_all(),
            SessionEvent::StatusChanged { .. } | SessionEvent::MessagesAdded(_) => {}
        }
        Ok(())
    }

    /// Signals produced since the last call
    pub fn take_outbound(&mut self) -> Vec<SignalMessage> {
        let mut signals = Vec::new();
        while let Ok(signal) = self.outbound.try_recv() {
            signals.push(signal);
        }
        signals
    }

    /// Hand every pending signal to `session`
    pub async fn flush(&mut self, session: &SyncSession) -> Result<usize> {
        let signals = self.take_outbound();
        let count = signals.len();
        for signal in signals {
            session.signal(signal).await?;
        }
        Ok(count)
    }
}
