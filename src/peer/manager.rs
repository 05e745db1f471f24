//! Peer connection manager
//!
//! Keeps one [`PeerConnection`] per remote participant and the local media
//! tracks every connection sends. Track changes are applied in place on the
//! existing senders; only adding or removing a screen share renegotiates.
//! Outbound signaling is queued on an unbounded channel for the caller to
//! deliver.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;

use crate::model::ParticipantId;

use super::connection::PeerConnection;
use super::error::PeerError;
use super::signal::SignalMessage;
use super::state::IceConnectionState;
use super::track::{MediaTrack, TrackRole};

pub struct PeerConnectionManager {
    local_id: ParticipantId,
    peers: HashMap<ParticipantId, PeerConnection>,
    /// Captured tracks by role, as captured (enabled flag is the user's)
    tracks: HashMap<TrackRole, MediaTrack>,
    camera_enabled: bool,
    microphone_enabled: bool,
    remote_sharers: BTreeSet<ParticipantId>,
    signals: mpsc::UnboundedSender<SignalMessage>,
}

impl PeerConnectionManager {
    /// Create a manager and the receiver of its outbound signals
    pub fn new(local_id: ParticipantId) -> (Self, mpsc::UnboundedReceiver<SignalMessage>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let manager = Self {
            local_id,
            peers: HashMap::new(),
            tracks: HashMap::new(),
            camera_enabled: true,
            microphone_enabled: true,
            remote_sharers: BTreeSet::new(),
            signals,
        };
        (manager, rx)
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn peer(&self, id: &ParticipantId) -> Option<&PeerConnection> {
        self.peers.get(id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.tracks.contains_key(&TrackRole::Screen)
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    pub fn microphone_enabled(&self) -> bool {
        self.microphone_enabled
    }

    /// Remote participants currently sharing their screen
    pub fn remote_screen_sharers(&self) -> Vec<ParticipantId> {
        self.remote_sharers.iter().cloned().collect()
    }

    /// Track as it should be sent right now for `role`
    fn outgoing(&self, role: TrackRole) -> Option<MediaTrack> {
        let track = self.tracks.get(&role)?.clone();
        let enabled = match role {
            TrackRole::Microphone => self.microphone_enabled,
            // Camera is muted while the screen is shared
            TrackRole::Camera => self.camera_enabled && !self.is_screen_sharing(),
            TrackRole::Screen => true,
        };
        let enabled = track.enabled && enabled;
        Some(track.with_enabled(enabled))
    }

    /// Open a connection to `peer`
    ///
    /// Returns `false` if one already exists. The initiator sends the first
    /// offer.
    pub fn add_peer(&mut self, peer: ParticipantId, initiator: bool) -> Result<bool, PeerError> {
        if peer == self.local_id || self.peers.contains_key(&peer) {
            return Ok(false);
        }

        let mut conn = PeerConnection::new(peer.clone(), initiator);
        for role in [TrackRole::Microphone, TrackRole::Camera, TrackRole::Screen] {
            if self.tracks.contains_key(&role) {
                conn.add_sender(role, self.outgoing(role));
            }
        }

        if initiator {
            let description = conn.create_offer()?;
            self.signal(SignalMessage::Offer {
                from: self.local_id.clone(),
                to: peer.clone(),
                description,
                track_roles: conn.track_roles(),
            });
        }

        tracing::info!(peer = %peer, initiator, "Peer added");
        self.peers.insert(peer, conn);
        Ok(true)
    }

    /// Apply an inbound signaling message
    pub fn handle_signal(&mut self, signal: SignalMessage) -> Result<(), PeerError> {
        if let Some(to) = signal.to() {
            if *to != self.local_id {
                tracing::debug!(signal = signal.name(), to = %to, "Signal for someone else");
                return Ok(());
            }
        }

        match signal {
            SignalMessage::Offer {
                from,
                description,
                track_roles,
                ..
            } => {
                self.add_peer(from.clone(), false)?;
                let conn = self
                    .peers
                    .get_mut(&from)
                    .ok_or_else(|| PeerError::UnknownPeer(from.clone()))?;

                if track_roles.contains(&TrackRole::Screen) {
                    self.remote_sharers.insert(from.clone());
                } else {
                    self.remote_sharers.remove(&from);
                }

                let answer = conn.accept_offer(description, track_roles)?;
                self.signal(SignalMessage::Answer {
                    from: self.local_id.clone(),
                    to: from,
                    description: answer,
                });
            }
            SignalMessage::Answer {
                from, description, ..
            } => {
                self.connection(&from)?.accept_answer(description)?;
            }
            SignalMessage::IceCandidate {
                from, candidate, ..
            } => {
                self.connection(&from)?.add_ice_candidate(candidate)?;
            }
            SignalMessage::PeerLeft { from } => {
                self.remove_peer(&from);
            }
        }
        Ok(())
    }

    /// Install or swap the local track for `role` on every connection
    ///
    /// Existing senders are updated in place; no connection is recreated
    /// and nothing is renegotiated. A connection that has no sender for
    /// `role` yet (a track granted after the call started) gets one and is
    /// renegotiated. Returns the number of senders updated in place.
    pub fn replace_track(
        &mut self,
        role: TrackRole,
        track: Option<MediaTrack>,
    ) -> Result<usize, PeerError> {
        match track {
            Some(track) => {
                self.tracks.insert(role, track);
            }
            None => {
                self.tracks.remove(&role);
            }
        }

        let outgoing = self.outgoing(role);
        let mut updated = 0;
        let mut added = Vec::new();
        for (id, conn) in self.peers.iter_mut() {
            if conn.replace_track(role, outgoing.clone()) {
                updated += 1;
            } else if outgoing.is_some() {
                conn.add_sender(role, outgoing.clone());
                added.push(id.clone());
            }
        }
        tracing::debug!(role = %role, updated, added = added.len(), "Track replaced");

        for peer in added {
            self.renegotiate(&peer)?;
        }
        Ok(updated)
    }

    pub fn set_camera_enabled(&mut self, enabled: bool) -> usize {
        self.camera_enabled = enabled;
        self.refresh(TrackRole::Camera)
    }

    pub fn set_microphone_enabled(&mut self, enabled: bool) -> usize {
        self.microphone_enabled = enabled;
        self.refresh(TrackRole::Microphone)
    }

    /// Add a screen track to every connection and renegotiate
    ///
    /// The camera track is muted for the duration of the share.
    pub fn start_screen_share(&mut self, track: MediaTrack) -> Result<(), PeerError> {
        if self.is_screen_sharing() {
            return Err(PeerError::ScreenShareActive);
        }
        self.tracks.insert(TrackRole::Screen, track);
        self.refresh(TrackRole::Camera);

        let screen = self.outgoing(TrackRole::Screen);
        for conn in self.peers.values_mut() {
            conn.add_sender(TrackRole::Screen, screen.clone());
        }
        tracing::info!(peers = self.peers.len(), "Screen share started");
        self.renegotiate_all()
    }

    /// Remove the screen track, renegotiate and restore the camera
    pub fn stop_screen_share(&mut self) -> Result<(), PeerError> {
        if self.tracks.remove(&TrackRole::Screen).is_none() {
            return Err(PeerError::NoScreenShare);
        }
        for conn in self.peers.values_mut() {
            conn.remove_sender(TrackRole::Screen);
        }
        self.refresh(TrackRole::Camera);
        tracing::info!(peers = self.peers.len(), "Screen share stopped");
        self.renegotiate_all()
    }

    /// React to an ICE state change; terminal states drop the peer
    pub fn on_ice_state(&mut self, peer: &ParticipantId, state: IceConnectionState) -> bool {
        if state.is_terminal() {
            tracing::warn!(peer = %peer, state = ?state, "ICE connection lost");
            self.remove_peer(peer)
        } else {
            false
        }
    }

    /// ICE failed for `peer`; the connection is dropped
    pub fn on_ice_failure(&mut self, peer: &ParticipantId) -> bool {
        self.on_ice_state(peer, IceConnectionState::Failed)
    }

    pub fn remove_peer(&mut self, peer: &ParticipantId) -> bool {
        self.remote_sharers.remove(peer);
        match self.peers.remove(peer) {
            Some(mut conn) => {
                conn.close();
                tracing::info!(peer = %peer, "Peer removed");
                true
            }
            None => false,
        }
    }

    /// Close every connection
    pub fn close_all(&mut self) {
        for (_, mut conn) in self.peers.drain() {
            conn.close();
        }
        self.remote_sharers.clear();
    }

    fn connection(&mut self, peer: &ParticipantId) -> Result<&mut PeerConnection, PeerError> {
        self.peers
            .get_mut(peer)
            .ok_or_else(|| PeerError::UnknownPeer(peer.clone()))
    }

    fn refresh(&mut self, role: TrackRole) -> usize {
        let outgoing = self.outgoing(role);
        let mut updated = 0;
        for conn in self.peers.values_mut() {
            if conn.replace_track(role, outgoing.clone()) {
                updated += 1;
            }
        }
        updated
    }

    fn renegotiate(&mut self, peer: &ParticipantId) -> Result<(), PeerError> {
        let local_id = self.local_id.clone();
        let conn = self.connection(peer)?;
        let description = conn.create_offer()?;
        let offer = SignalMessage::Offer {
            from: local_id,
            to: peer.clone(),
            description,
            track_roles: conn.track_roles(),
        };
        self.signal(offer);
        Ok(())
    }

    fn renegotiate_all(&mut self) -> Result<(), PeerError> {
        for peer in self.peer_ids() {
            self.renegotiate(&peer)?;
        }
        Ok(())
    }

    fn signal(&self, message: SignalMessage) {
        if self.signals.send(message).is_err() {
            tracing::debug!("Signal receiver dropped");
        }
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::state::PeerPhase;
    use crate::peer::track::TrackKind;

    struct Side {
        manager: PeerConnectionManager,
        outbox: mpsc::UnboundedReceiver<SignalMessage>,
    }

    fn side(id: &str) -> Side {
        let (mut manager, outbox) = PeerConnectionManager::new(ParticipantId::new(id));
        manager
            .replace_track(TrackRole::Microphone, Some(MediaTrack::generate(TrackKind::Audio)))
            .unwrap();
        manager
            .replace_track(TrackRole::Camera, Some(MediaTrack::generate(TrackKind::Video)))
            .unwrap();
        Side { manager, outbox }
    }

    /// Deliver queued signals both ways until quiet
    fn pump(a: &mut Side, b: &mut Side) {
        loop {
            let mut moved = false;
            while let Ok(signal) = a.outbox.try_recv() {
                b.manager.handle_signal(signal).unwrap();
                moved = true;
            }
            while let Ok(signal) = b.outbox.try_recv() {
                a.manager.handle_signal(signal).unwrap();
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    fn connected_pair() -> (Side, Side) {
        let mut a = side("a");
        let mut b = side("b");
        a.manager.add_peer(ParticipantId::new("b"), true).unwrap();
        pump(&mut a, &mut b);
        (a, b)
    }

    fn phase(side: &Side, peer: &str) -> PeerPhase {
        side.manager.peer(&ParticipantId::new(peer)).unwrap().phase()
    }

    #[test]
    fn test_handshake() {
        let (a, b) = connected_pair();
        assert_eq!(phase(&a, "b"), PeerPhase::Connected);
        assert_eq!(phase(&b, "a"), PeerPhase::Connected);
        assert_eq!(
            b.manager.peer(&ParticipantId::new("a")).unwrap().remote_roles(),
            &[TrackRole::Microphone, TrackRole::Camera]
        );
    }

    #[test]
    fn test_add_peer_idempotent() {
        let (mut a, _b) = connected_pair();
        assert!(!a.manager.add_peer(ParticipantId::new("b"), true).unwrap());
        assert!(!a.manager.add_peer(ParticipantId::new("a"), true).unwrap());
        assert_eq!(a.manager.peer_count(), 1);
        assert!(a.outbox.try_recv().is_err());
    }

    #[test]
    fn test_camera_toggle_keeps_connection() {
        let (mut a, mut b) = connected_pair();
        let negotiations = a.manager.peer(&ParticipantId::new("b")).unwrap().negotiations();

        for _ in 0..2 {
            assert_eq!(a.manager.set_camera_enabled(false), 1);
            assert_eq!(a.manager.set_camera_enabled(true), 1);
        }
        pump(&mut a, &mut b);

        assert_eq!(a.manager.peer_count(), 1);
        assert_eq!(phase(&a, "b"), PeerPhase::Connected);
        let conn = a.manager.peer(&ParticipantId::new("b")).unwrap();
        assert_eq!(conn.negotiations(), negotiations);
        assert!(conn.sender(TrackRole::Camera).unwrap().is_active());
    }

    #[test]
    fn test_late_camera_reaches_connected_peer() {
        let (manager, outbox) = PeerConnectionManager::new(ParticipantId::new("a"));
        let mut a = Side { manager, outbox };
        let mut b = side("b");
        a.manager
            .replace_track(TrackRole::Microphone, Some(MediaTrack::generate(TrackKind::Audio)))
            .unwrap();
        a.manager.add_peer(ParticipantId::new("b"), true).unwrap();
        pump(&mut a, &mut b);
        assert_eq!(
            b.manager.peer(&ParticipantId::new("a")).unwrap().remote_roles(),
            &[TrackRole::Microphone]
        );

        // Camera permission granted mid-call: no sender to swap, so one is added
        let updated = a
            .manager
            .replace_track(TrackRole::Camera, Some(MediaTrack::generate(TrackKind::Video)))
            .unwrap();
        assert_eq!(updated, 0);
        assert_eq!(phase(&a, "b"), PeerPhase::Renegotiating);

        pump(&mut a, &mut b);
        assert_eq!(a.manager.peer_count(), 1);
        assert_eq!(phase(&a, "b"), PeerPhase::Connected);
        assert!(a
            .manager
            .peer(&ParticipantId::new("b"))
            .unwrap()
            .sender(TrackRole::Camera)
            .unwrap()
            .is_active());
        assert_eq!(
            b.manager.peer(&ParticipantId::new("a")).unwrap().remote_roles(),
            &[TrackRole::Microphone, TrackRole::Camera]
        );

        // A second swap is in place again
        let updated = a
            .manager
            .replace_track(TrackRole::Camera, Some(MediaTrack::generate(TrackKind::Video)))
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(phase(&a, "b"), PeerPhase::Connected);
        assert!(a.outbox.try_recv().is_err());
    }

    #[test]
    fn test_screen_share_round_trip() {
        let (mut a, mut b) = connected_pair();

        a.manager
            .start_screen_share(MediaTrack::generate(TrackKind::Video))
            .unwrap();
        assert!(a.manager.is_screen_sharing());
        let conn = a.manager.peer(&ParticipantId::new("b")).unwrap();
        assert!(!conn.sender(TrackRole::Camera).unwrap().is_active());
        assert_eq!(conn.phase(), PeerPhase::Renegotiating);

        pump(&mut a, &mut b);
        assert_eq!(phase(&a, "b"), PeerPhase::Connected);
        assert_eq!(b.manager.remote_screen_sharers(), vec![ParticipantId::new("a")]);

        assert!(matches!(
            a.manager.start_screen_share(MediaTrack::generate(TrackKind::Video)),
            Err(PeerError::ScreenShareActive)
        ));

        a.manager.stop_screen_share().unwrap();
        pump(&mut a, &mut b);
        assert!(b.manager.remote_screen_sharers().is_empty());
        let conn = a.manager.peer(&ParticipantId::new("b")).unwrap();
        assert!(conn.sender(TrackRole::Screen).is_none());
        assert!(conn.sender(TrackRole::Camera).unwrap().is_active());
        assert!(matches!(a.manager.stop_screen_share(), Err(PeerError::NoScreenShare)));
    }

    #[test]
    fn test_camera_stays_off_after_share_if_user_disabled_it() {
        let (mut a, mut b) = connected_pair();
        a.manager.set_camera_enabled(false);
        a.manager
            .start_screen_share(MediaTrack::generate(TrackKind::Video))
            .unwrap();
        pump(&mut a, &mut b);
        a.manager.stop_screen_share().unwrap();

        let conn = a.manager.peer(&ParticipantId::new("b")).unwrap();
        assert!(!conn.sender(TrackRole::Camera).unwrap().is_active());
    }

    #[test]
    fn test_ice_failure_and_peer_left() {
        let (mut a, mut b) = connected_pair();

        assert!(!a.manager.on_ice_state(&ParticipantId::new("b"), IceConnectionState::Disconnected));
        assert!(a.manager.on_ice_failure(&ParticipantId::new("b")));
        assert_eq!(a.manager.peer_count(), 0);

        b.manager
            .handle_signal(SignalMessage::PeerLeft {
                from: ParticipantId::new("a"),
            })
            .unwrap();
        assert_eq!(b.manager.peer_count(), 0);
    }

    #[test]
    fn test_signals_for_unknown_peer() {
        let (mut manager, _rx) = PeerConnectionManager::new(ParticipantId::new("a"));
        let err = manager
            .handle_signal(SignalMessage::IceCandidate {
                from: ParticipantId::new("ghost"),
                to: ParticipantId::new("a"),
                candidate: crate::peer::signal::IceCandidate::new("c"),
            })
            .unwrap_err();
        assert_eq!(err, PeerError::UnknownPeer(ParticipantId::new("ghost")));

        // Addressed elsewhere: ignored
        manager
            .handle_signal(SignalMessage::IceCandidate {
                from: ParticipantId::new("ghost"),
                to: ParticipantId::new("z"),
                candidate: crate::peer::signal::IceCandidate::new("c"),
            })
            .unwrap();
    }
}
