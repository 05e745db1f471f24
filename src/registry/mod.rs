//! Shared per-room resources
//!
//! The registry owns one broadcast channel and one catch-up cache per room.
//! Clients take a reference with [`RoomRegistry::acquire`] and give it back
//! with [`RoomHandle::release`]; nothing lives in ambient global state.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<RoomRegistry>
//!                     ┌─────────────────────────┐
//!                     │ rooms: HashMap<RoomId,  │
//!                     │   RoomEntry {           │
//!                     │     log, awareness,     │
//!                     │     tx: broadcast::Tx,  │
//!                     │     ref_count,          │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [RoomHandle]            [RoomHandle]            [RoomHandle]
//!    publish()               recv()                  recv()
//!         │                       │                       │
//!         └──► registry.publish() ──► broadcast ──► other handles
//! ```
//!
//! When the last handle is released the room goes idle but keeps its log
//! until `idle_room_timeout` passes, so a quick re-acquire (remount, tab
//! reload) picks up where it left off.

pub mod config;
pub mod entry;
pub mod envelope;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{RoomEntry, RoomState, RoomStats};
pub use envelope::{Catchup, Envelope, Payload};
pub use error::RegistryError;
pub use store::{Received, RoomHandle, RoomRegistry};
