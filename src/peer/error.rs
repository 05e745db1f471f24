//! Peer connection errors

use thiserror::Error;

use crate::model::ParticipantId;

use super::state::PeerPhase;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("no connection to peer {0}")]
    UnknownPeer(ParticipantId),

    #[error("peer {peer}: cannot move from {from} to {to}")]
    InvalidTransition {
        peer: ParticipantId,
        from: PeerPhase,
        to: PeerPhase,
    },

    #[error("peer {peer}: unexpected {signal} while {phase}")]
    UnexpectedSignal {
        peer: ParticipantId,
        signal: &'static str,
        phase: PeerPhase,
    },

    #[error("screen share already active")]
    ScreenShareActive,

    #[error("no screen share active")]
    NoScreenShare,
}
