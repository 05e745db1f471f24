//! Peer connections
//!
//! Bookkeeping for the mesh of media connections between room members:
//! negotiation phases, the senders of each connection and the signaling
//! that drives them. Media and session descriptions are opaque values.

pub mod call;
pub mod connection;
pub mod error;
pub mod manager;
pub mod media;
pub mod signal;
pub mod state;
pub mod track;

pub use call::CallBridge;
pub use connection::PeerConnection;
pub use error::PeerError;
pub use manager::PeerConnectionManager;
pub use media::MediaError;
pub use signal::{IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use state::{IceConnectionState, PeerPhase};
pub use track::{MediaTrack, TrackKind, TrackRole, TrackSender};
