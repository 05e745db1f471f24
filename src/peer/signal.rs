//! Signaling messages exchanged between peers

use serde::{Deserialize, Serialize};

use crate::model::ParticipantId;

use super::track::TrackRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Opaque session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// A signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        from: ParticipantId,
        to: ParticipantId,
        description: SessionDescription,
        /// Roles of the offered tracks, in sender order
        track_roles: Vec<TrackRole>,
    },
    Answer {
        from: ParticipantId,
        to: ParticipantId,
        description: SessionDescription,
    },
    IceCandidate {
        from: ParticipantId,
        to: ParticipantId,
        candidate: IceCandidate,
    },
    PeerLeft {
        from: ParticipantId,
    },
}

impl SignalMessage {
    pub fn name(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::PeerLeft { .. } => "peer-left",
        }
    }

    pub fn from(&self) -> &ParticipantId {
        match self {
            SignalMessage::Offer { from, .. }
            | SignalMessage::Answer { from, .. }
            | SignalMessage::IceCandidate { from, .. }
            | SignalMessage::PeerLeft { from } => from,
        }
    }

    /// Addressee; `None` for messages meant for everyone
    pub fn to(&self) -> Option<&ParticipantId> {
        match self {
            SignalMessage::Offer { to, .. }
            | SignalMessage::Answer { to, .. }
            | SignalMessage::IceCandidate { to, .. } => Some(to),
            SignalMessage::PeerLeft { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_json_carries_roles() {
        let offer = SignalMessage::Offer {
            from: ParticipantId::new("a"),
            to: ParticipantId::new("b"),
            description: SessionDescription {
                kind: SdpType::Offer,
                sdp: "v=0".into(),
            },
            track_roles: vec![TrackRole::Microphone, TrackRole::Screen],
        };

        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["description"]["type"], "offer");
        assert_eq!(json["track_roles"][1], "screen");

        let back: SignalMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, offer);
    }

    #[test]
    fn test_addressing() {
        let left = SignalMessage::PeerLeft {
            from: ParticipantId::new("a"),
        };
        assert_eq!(left.from().as_str(), "a");
        assert!(left.to().is_none());
        assert_eq!(left.name(), "peer-left");
    }
}
