//! Central relay server
//!
//! The relay is the fallback authority when peers cannot reach each other
//! directly. Clients join a room over TCP, the relay keeps the room's
//! message log and member list, and fans every accepted message out to
//! all members.
//!
//! Wire format: each frame is a 4-byte big-endian length followed by a
//! JSON-encoded [`RelayFrame`].

pub mod codec;
pub mod config;
mod connection;
pub mod frame;
pub mod listener;
pub mod rooms;

pub use codec::FrameCodec;
pub use config::RelayConfig;
pub use frame::RelayFrame;
pub use listener::RelayServer;
pub use rooms::{MemberLink, RelayRooms};
