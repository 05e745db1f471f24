//! Local media tracks and the senders carrying them

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// What a track is used for
///
/// Offers carry the roles of their tracks explicitly, so the receiver never
/// has to guess whether a second video track is a screen share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackRole {
    Microphone,
    Camera,
    Screen,
}

impl TrackRole {
    pub fn kind(&self) -> TrackKind {
        match self {
            TrackRole::Microphone => TrackKind::Audio,
            TrackRole::Camera | TrackRole::Screen => TrackKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Microphone => "microphone",
            TrackRole::Camera => "camera",
            TrackRole::Screen => "screen",
        }
    }
}

impl std::fmt::Display for TrackRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle to a captured media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub enabled: bool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }

    /// A track with a fresh random id
    pub fn generate(kind: TrackKind) -> Self {
        Self::new(Uuid::new_v4().to_string(), kind)
    }

    /// Same track with the enabled flag changed
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// One outbound slot on a peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSender {
    role: TrackRole,
    track: Option<MediaTrack>,
}

impl TrackSender {
    pub fn new(role: TrackRole, track: Option<MediaTrack>) -> Self {
        Self { role, track }
    }

    pub fn role(&self) -> TrackRole {
        self.role
    }

    pub fn track(&self) -> Option<&MediaTrack> {
        self.track.as_ref()
    }

    /// Swap the track in place, returning the previous one
    pub fn replace(&mut self, track: Option<MediaTrack>) -> Option<MediaTrack> {
        std::mem::replace(&mut self.track, track)
    }

    /// Whether media currently flows from this sender
    pub fn is_active(&self) -> bool {
        self.track.as_ref().is_some_and(|t| t.enabled)
    }
}
