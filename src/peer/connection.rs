//! One peer connection
//!
//! Descriptions are opaque strings; the connection only tracks which
//! senders exist, which description is current and which phase the
//! negotiation is in.

use std::time::Instant;

use crate::model::ParticipantId;

use super::error::PeerError;
use super::signal::{IceCandidate, SdpType, SessionDescription};
use super::state::PeerPhase;
use super::track::{MediaTrack, TrackKind, TrackRole, TrackSender};

#[derive(Debug)]
pub struct PeerConnection {
    peer_id: ParticipantId,
    phase: PeerPhase,
    initiator: bool,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    senders: Vec<TrackSender>,
    /// Track roles announced by the remote side's last offer
    remote_roles: Vec<TrackRole>,
    /// Candidates received before the remote description
    pending_candidates: Vec<IceCandidate>,
    remote_candidates: Vec<IceCandidate>,
    /// Offers and answers produced so far
    negotiations: u32,
    created_at: Instant,
}

impl PeerConnection {
    pub fn new(peer_id: ParticipantId, initiator: bool) -> Self {
        Self {
            peer_id,
            phase: PeerPhase::Negotiating,
            initiator,
            local_description: None,
            remote_description: None,
            senders: Vec::new(),
            remote_roles: Vec::new(),
            pending_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            negotiations: 0,
            created_at: Instant::now(),
        }
    }

    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn senders(&self) -> &[TrackSender] {
        &self.senders
    }

    pub fn sender(&self, role: TrackRole) -> Option<&TrackSender> {
        self.senders.iter().find(|s| s.role() == role)
    }

    pub fn remote_roles(&self) -> &[TrackRole] {
        &self.remote_roles
    }

    pub fn remote_candidates(&self) -> &[IceCandidate] {
        &self.remote_candidates
    }

    pub fn negotiations(&self) -> u32 {
        self.negotiations
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Roles of the local senders, in sender order
    pub fn track_roles(&self) -> Vec<TrackRole> {
        self.senders.iter().map(|s| s.role()).collect()
    }

    /// Add a sender for `role`, or swap the track of the existing one
    pub fn add_sender(&mut self, role: TrackRole, track: Option<MediaTrack>) {
        match self.senders.iter_mut().find(|s| s.role() == role) {
            Some(sender) => {
                sender.replace(track);
            }
            None => self.senders.push(TrackSender::new(role, track)),
        }
    }

    pub fn remove_sender(&mut self, role: TrackRole) -> Option<TrackSender> {
        let index = self.senders.iter().position(|s| s.role() == role)?;
        Some(self.senders.remove(index))
    }

    /// Swap the track of an existing sender without renegotiating
    ///
    /// Returns `false` if there is no sender for `role`.
    pub fn replace_track(&mut self, role: TrackRole, track: Option<MediaTrack>) -> bool {
        match self.senders.iter_mut().find(|s| s.role() == role) {
            Some(sender) => {
                sender.replace(track);
                true
            }
            None => false,
        }
    }

    /// Produce a new local offer
    ///
    /// On an established connection this starts a renegotiation.
    pub fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        match self.phase {
            PeerPhase::Negotiating | PeerPhase::Renegotiating => {}
            PeerPhase::Connected => self.transition(PeerPhase::Renegotiating)?,
            PeerPhase::Closed => return Err(self.unexpected("offer")),
        }

        let offer = self.describe(SdpType::Offer);
        self.local_description = Some(offer.clone());
        Ok(offer)
    }

    /// Apply a remote offer and produce the answer
    pub fn accept_offer(
        &mut self,
        offer: SessionDescription,
        roles: Vec<TrackRole>,
    ) -> Result<SessionDescription, PeerError> {
        if offer.kind != SdpType::Offer {
            return Err(self.unexpected("answer description in offer"));
        }
        match self.phase {
            PeerPhase::Negotiating | PeerPhase::Renegotiating => {
                self.transition(PeerPhase::Connected)?
            }
            // Remote side renegotiates; we stay connected
            PeerPhase::Connected => {}
            PeerPhase::Closed => return Err(self.unexpected("offer")),
        }

        self.remote_description = Some(offer);
        self.remote_roles = roles;
        self.flush_candidates();

        let answer = self.describe(SdpType::Answer);
        self.local_description = Some(answer.clone());
        Ok(answer)
    }

    /// Apply the remote answer to our outstanding offer
    pub fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), PeerError> {
        let offered = self
            .local_description
            .as_ref()
            .is_some_and(|d| d.kind == SdpType::Offer);
        if answer.kind != SdpType::Answer || !offered {
            return Err(self.unexpected("answer"));
        }
        match self.phase {
            PeerPhase::Negotiating | PeerPhase::Renegotiating => {
                self.transition(PeerPhase::Connected)?
            }
            _ => return Err(self.unexpected("answer")),
        }

        self.remote_description = Some(answer);
        self.flush_candidates();
        Ok(())
    }

    /// Add a remote candidate, holding it until a remote description exists
    pub fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        if self.phase.is_closed() {
            return Err(self.unexpected("ice-candidate"));
        }
        if self.remote_description.is_some() {
            self.remote_candidates.push(candidate);
        } else {
            self.pending_candidates.push(candidate);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if !self.phase.is_closed() {
            self.phase = PeerPhase::Closed;
            tracing::debug!(peer = %self.peer_id, "Peer connection closed");
        }
    }

    fn transition(&mut self, next: PeerPhase) -> Result<(), PeerError> {
        if !self.phase.can_transition_to(next) {
            return Err(PeerError::InvalidTransition {
                peer: self.peer_id.clone(),
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(peer = %self.peer_id, from = %self.phase, to = %next, "Peer phase change");
        self.phase = next;
        Ok(())
    }

    fn unexpected(&self, signal: &'static str) -> PeerError {
        PeerError::UnexpectedSignal {
            peer: self.peer_id.clone(),
            signal,
            phase: self.phase,
        }
    }

    fn flush_candidates(&mut self) {
        self.remote_candidates.append(&mut self.pending_candidates);
    }

    fn describe(&mut self, kind: SdpType) -> SessionDescription {
        self.negotiations += 1;
        let mut sdp = format!("v=0\r\no=- {} {} IN IP4 0.0.0.0\r\n", self.peer_id, self.negotiations);
        for sender in &self.senders {
            let track = sender.track().map(|t| t.id.as_str()).unwrap_or("-");
            let kind = match sender.role().kind() {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            };
            sdp.push_str(&format!("m={kind} a=role:{} a=track:{track}\r\n", sender.role()));
        }
        SessionDescription { kind, sdp }
    }
}
