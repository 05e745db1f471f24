//! Peer connection phases

use serde::{Deserialize, Serialize};

/// Lifecycle of one peer connection
///
/// ```text
/// Negotiating ──► Connected ◄──► Renegotiating
///      │              │                │
///      └──────────────┴───► Closed ◄───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerPhase {
    /// First offer/answer exchange in progress
    Negotiating,
    /// Descriptions exchanged, media flowing
    Connected,
    /// A new offer is out on an established connection
    Renegotiating,
    /// Terminal
    Closed,
}

impl PeerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerPhase::Negotiating => "negotiating",
            PeerPhase::Connected => "connected",
            PeerPhase::Renegotiating => "renegotiating",
            PeerPhase::Closed => "closed",
        }
    }

    pub fn can_transition_to(&self, next: PeerPhase) -> bool {
        use PeerPhase::*;
        matches!(
            (self, next),
            (Negotiating, Connected)
                | (Connected, Renegotiating)
                | (Renegotiating, Connected)
                | (Negotiating | Connected | Renegotiating, Closed)
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PeerPhase::Closed)
    }
}

impl std::fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE connectivity as reported by the media stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// States after which the connection will not recover
    pub fn is_terminal(&self) -> bool {
        matches!(self, IceConnectionState::Failed | IceConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(PeerPhase::Negotiating.can_transition_to(PeerPhase::Connected));
        assert!(PeerPhase::Connected.can_transition_to(PeerPhase::Renegotiating));
        assert!(PeerPhase::Renegotiating.can_transition_to(PeerPhase::Connected));
        assert!(PeerPhase::Renegotiating.can_transition_to(PeerPhase::Closed));

        assert!(!PeerPhase::Negotiating.can_transition_to(PeerPhase::Renegotiating));
        assert!(!PeerPhase::Closed.can_transition_to(PeerPhase::Connected));
        assert!(!PeerPhase::Closed.can_transition_to(PeerPhase::Closed));
    }

    #[test]
    fn test_terminal_ice_states() {
        assert!(IceConnectionState::Failed.is_terminal());
        assert!(!IceConnectionState::Disconnected.is_terminal());
    }
}
