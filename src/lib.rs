//! roomsync: presence and message replication for collaboration rooms
//!
//! Keeps every member of a room looking at the same state:
//!
//! - who is online, with liveness timeouts ([`presence`])
//! - an ordered, duplicate-free message log ([`message_log`])
//! - one session view over interchangeable transports ([`session`],
//!   [`transport`]): in-process broadcast, a TCP relay ([`server`]) and a
//!   polling fallback
//! - media peer connection bookkeeping and call signaling ([`peer`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use roomsync::{Participant, RoomRegistry, SyncConfig, SyncSession, TransportResources};
//!
//! # async fn demo() -> roomsync::Result<()> {
//! let registry = Arc::new(RoomRegistry::new());
//! let resources = TransportResources::new().with_registry(registry);
//!
//! let mut session = SyncSession::new(
//!     SyncConfig::default(),
//!     Participant::new("alice", "Alice"),
//!     resources,
//! );
//! session.join("standup").await;
//! session.wait_connected(Duration::from_secs(5)).await;
//! session.send("hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod message_log;
pub mod model;
pub mod peer;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
pub use message_log::MessageLog;
pub use model::{Message, MessageId, Participant, ParticipantId, RoomId, RosterEntry};
pub use peer::{CallBridge, PeerConnectionManager, SignalMessage};
pub use presence::PresenceRegistry;
pub use registry::{RegistryConfig, RoomRegistry};
pub use server::{RelayConfig, RelayServer};
pub use session::{ConnectionStatus, SessionEvent, SyncConfig, SyncSession};
pub use transport::{PollingStore, TransportKind, TransportResources};
