//! Transports
//!
//! Three ways to reach the other members of a room, behind one
//! [`ConnectionStrategy`] interface:
//!
//! - [`BroadcastTransport`]: peer-to-peer style fan-out through a shared
//!   [`RoomRegistry`](crate::registry::RoomRegistry), no server involved
//! - [`RelayTransport`]: TCP connection to a central relay server, with
//!   bounded reconnection and linear backoff
//! - [`PollingTransport`]: periodic polling of a shared
//!   [`PollingStore`], the last-resort fallback for same-process clients
//!
//! The session picks one per room through [`Transport::build`] and talks
//! to it only through the trait. Inbound traffic from every transport
//! arrives as [`TransportEvent`]s on an mpsc channel.

pub mod broadcast;
pub mod polling;
pub mod relay;

pub use self::broadcast::BroadcastTransport;
pub use polling::{PollSnapshot, PollingStore, PollingTransport};
pub use relay::{RelaySettings, RelayTransport};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};
use crate::model::{Message, Participant, ParticipantId, RoomId, RosterEntry};
use crate::peer::SignalMessage;
use crate::registry::RoomRegistry;
use crate::session::SyncConfig;

/// Which transport a signal came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Broadcast,
    Relay,
    Polling,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Broadcast => "broadcast",
            TransportKind::Relay => "relay",
            TransportKind::Polling => "polling",
        }
    }

    /// Default preference order
    pub fn preference() -> Vec<TransportKind> {
        vec![
            TransportKind::Broadcast,
            TransportKind::Relay,
            TransportKind::Polling,
        ]
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound traffic from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link established (or re-established)
    Connected(TransportKind),

    /// Link lost. `permanent` means the transport gave up and will not
    /// reconnect on its own.
    Disconnected { kind: TransportKind, permanent: bool },

    /// Messages received, possibly including ones already known
    Messages(Vec<Message>),

    /// A participant announced or refreshed presence
    PresenceJoined(Participant),

    /// A participant left explicitly
    PresenceLeft(ParticipantId),

    /// Complete roster as seen by the transport
    Roster(Vec<RosterEntry>),

    /// Call signaling addressed to us (or to the whole call)
    Signal(SignalMessage),

    /// Members already in the call when we joined it
    ExistingPeers(Vec<ParticipantId>),

    /// Another member joined the call
    NewPeer(ParticipantId),
}

/// Common interface of all transports
#[async_trait]
pub trait ConnectionStrategy: Send {
    /// Which transport this is
    fn kind(&self) -> TransportKind;

    /// Whether the link is currently up
    fn is_connected(&self) -> bool;

    /// Join `room` as `local`, delivering inbound traffic to `events`
    async fn connect(
        &mut self,
        room: &RoomId,
        local: &Participant,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()>;

    /// Deliver a locally composed message to the room
    async fn send(&mut self, message: &Message) -> Result<()>;

    /// Refresh our presence with the room
    async fn heartbeat(&mut self) -> Result<()>;

    /// Leave the room and release every resource and subscription
    async fn disconnect(&mut self);

    /// Enter the room's call; existing members arrive as
    /// [`TransportEvent::ExistingPeers`]
    async fn join_call(&mut self) -> Result<()> {
        Err(self.unsupported("join-call"))
    }

    async fn leave_call(&mut self) -> Result<()> {
        Err(self.unsupported("leave-call"))
    }

    /// Route a signaling message to its addressee
    async fn signal(&mut self, _signal: &SignalMessage) -> Result<()> {
        Err(self.unsupported("signal"))
    }

    fn unsupported(&self, operation: &'static str) -> crate::Error {
        TransportError::Unsupported {
            transport: self.kind().as_str(),
            operation,
        }
        .into()
    }
}

/// Shared resources transports are built from
#[derive(Clone, Default)]
pub struct TransportResources {
    /// In-process room registry for the broadcast transport
    pub registry: Option<Arc<RoomRegistry>>,
    /// Shared store for the polling transport
    pub polling: Option<Arc<PollingStore>>,
}

impl TransportResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: Arc<RoomRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_polling(mut self, store: Arc<PollingStore>) -> Self {
        self.polling = Some(store);
        self
    }
}

/// One of the available transports
pub enum Transport {
    Broadcast(BroadcastTransport),
    Relay(RelayTransport),
    Polling(PollingTransport),
}

impl Transport {
    /// Build the transport of `kind`, or `None` if its resources are missing
    pub fn build(
        kind: TransportKind,
        resources: &TransportResources,
        config: &SyncConfig,
    ) -> Option<Self> {
        match kind {
            TransportKind::Broadcast => resources
                .registry
                .as_ref()
                .map(|r| Transport::Broadcast(BroadcastTransport::new(Arc::clone(r)))),
            TransportKind::Relay => config
                .relay_addr
                .map(|addr| Transport::Relay(RelayTransport::new(RelaySettings::from_config(addr, config)))),
            TransportKind::Polling => resources.polling.as_ref().map(|store| {
                Transport::Polling(
                    PollingTransport::new(Arc::clone(store), config.poll_interval)
                        .liveness_window(config.liveness_window),
                )
            }),
        }
    }

    fn strategy(&mut self) -> &mut dyn ConnectionStrategy {
        match self {
            Transport::Broadcast(t) => t,
            Transport::Relay(t) => t,
            Transport::Polling(t) => t,
        }
    }

    fn strategy_ref(&self) -> &dyn ConnectionStrategy {
        match self {
            Transport::Broadcast(t) => t,
            Transport::Relay(t) => t,
            Transport::Polling(t) => t,
        }
    }
}

#[async_trait]
impl ConnectionStrategy for Transport {
    fn kind(&self) -> TransportKind {
        self.strategy_ref().kind()
    }

    fn is_connected(&self) -> bool {
        self.strategy_ref().is_connected()
    }

    async fn connect(
        &mut self,
        room: &RoomId,
        local: &Participant,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        self.strategy().connect(room, local, events).await
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        self.strategy().send(message).await
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.strategy().heartbeat().await
    }

    async fn disconnect(&mut self) {
        self.strategy().disconnect().await
    }

    async fn join_call(&mut self) -> Result<()> {
        self.strategy().join_call().await
    }

    async fn leave_call(&mut self) -> Result<()> {
        self.strategy().leave_call().await
    }

    async fn signal(&mut self, signal: &SignalMessage) -> Result<()> {
        self.strategy().signal(signal).await
    }
}
