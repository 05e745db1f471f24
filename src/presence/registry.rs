//! Presence registry

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::model::{Participant, ParticipantId, RosterEntry};
use crate::transport::TransportKind;

use super::entry::PresenceEntry;

/// Participants that appeared or disappeared in one update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub joined: Vec<Participant>,
    pub left: Vec<Participant>,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// Online-participant set for one room, as seen by one local participant
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    local_id: ParticipantId,
    liveness_window: Duration,
    entries: HashMap<ParticipantId, PresenceEntry>,
}

impl PresenceRegistry {
    /// Create a registry for `local_id` with the given liveness window
    pub fn new(local_id: ParticipantId, liveness_window: Duration) -> Self {
        Self {
            local_id,
            liveness_window,
            entries: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Record a presence signal now
    pub fn heartbeat(&mut self, source: TransportKind, participant: Participant) -> bool {
        self.heartbeat_at(source, participant, Instant::now())
    }

    /// Record a presence signal at `now`
    ///
    /// Returns `true` if the participant was not online before. Signals
    /// about the local participant are ignored.
    pub fn heartbeat_at(
        &mut self,
        source: TransportKind,
        participant: Participant,
        now: Instant,
    ) -> bool {
        if participant.id == self.local_id {
            return false;
        }

        let window = self.liveness_window;
        match self.entries.get_mut(&participant.id) {
            Some(entry) => {
                let was_live = entry.is_live(now, window);
                entry.participant = participant;
                entry.touch(source, now);
                !was_live
            }
            None => {
                tracing::debug!(participant = %participant.id, source = %source, "Participant online");
                let mut entry = PresenceEntry::new(participant.clone());
                entry.touch(source, now);
                self.entries.insert(participant.id, entry);
                true
            }
        }
    }

    /// Explicit departure reported by `source`
    ///
    /// Returns the participant if no other source still reports it.
    pub fn leave(&mut self, source: TransportKind, id: &ParticipantId) -> Option<Participant> {
        let entry = self.entries.get_mut(id)?;
        if entry.forget(source) {
            tracing::debug!(participant = %id, source = %source, "Participant left");
            self.entries.remove(id).map(|e| e.participant)
        } else {
            None
        }
    }

    /// Replace everything `source` reports with `roster`
    ///
    /// Relay and polling transports deliver complete rosters rather than
    /// individual join/leave events. Each entry is dated by its reported
    /// idle time, so a member the remote end still lists but has not heard
    /// from within the window is treated as absent.
    pub fn replace_roster_at(
        &mut self,
        source: TransportKind,
        roster: Vec<RosterEntry>,
        now: Instant,
    ) -> RosterDelta {
        let mut delta = RosterDelta::default();
        let window = self.liveness_window;
        let roster: Vec<RosterEntry> = roster
            .into_iter()
            .filter(|e| e.idle_for() <= window)
            .collect();
        let listed: HashSet<ParticipantId> =
            roster.iter().map(|e| e.participant.id.clone()).collect();

        let stale: Vec<ParticipantId> = self
            .entries
            .iter()
            .filter(|(id, entry)| entry.seen_via(source) && !listed.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(p) = self.leave(source, &id) {
                delta.left.push(p);
            }
        }

        for entry in roster {
            let seen = now.checked_sub(entry.idle_for()).unwrap_or(now);
            let was_live = self
                .entries
                .get(&entry.participant.id)
                .is_some_and(|e| e.is_live(now, window));
            let participant = entry.participant;
            self.heartbeat_at(source, participant.clone(), seen);
            if !was_live && participant.id != self.local_id {
                delta.joined.push(participant);
            }
        }

        delta
    }

    /// Replace a source roster now
    pub fn replace_roster(&mut self, source: TransportKind, roster: Vec<RosterEntry>) -> RosterDelta {
        self.replace_roster_at(source, roster, Instant::now())
    }

    /// Forget every signal from one transport (used on teardown)
    pub fn clear_source(&mut self, source: TransportKind) -> Vec<Participant> {
        let ids: Vec<ParticipantId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.seen_via(source))
            .map(|(id, _)| id.clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.leave(source, &id))
            .collect()
    }

    /// Expire entries not refreshed within the window
    pub fn sweep(&mut self) -> Vec<Participant> {
        self.sweep_at(Instant::now())
    }

    /// Expire entries not refreshed within the window as of `now`
    pub fn sweep_at(&mut self, now: Instant) -> Vec<Participant> {
        let window = self.liveness_window;
        let expired: Vec<ParticipantId> = self
            .entries
            .iter_mut()
            .filter_map(|(id, entry)| entry.expire(now, window).then(|| id.clone()))
            .collect();

        let mut departed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(entry) = self.entries.remove(&id) {
                tracing::debug!(participant = %id, "Participant timed out");
                departed.push(entry.participant);
            }
        }
        departed
    }

    /// Online participants, excluding the local one, sorted by id
    pub fn online(&self) -> Vec<Participant> {
        self.online_at(Instant::now())
    }

    /// Online participants as of `now`
    ///
    /// Entries past the window are hidden even before `sweep` runs.
    pub fn online_at(&self, now: Instant) -> Vec<Participant> {
        let mut online: Vec<Participant> = self
            .entries
            .values()
            .filter(|e| e.is_live(now, self.liveness_window))
            .map(|e| e.participant.clone())
            .collect();
        online.sort_by(|a, b| a.id.cmp(&b.id));
        online
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &ParticipantId) -> Option<&PresenceEntry> {
        self.entries.get(id)
    }

    /// Number of tracked participants (including ones awaiting sweep)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(id: &str, name: &str) -> RosterEntry {
        RosterEntry::fresh(Participant::new(id, name))
    }

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(ParticipantId::new("me"), Duration::from_secs(30))
    }

    #[test]
    fn test_self_exclusion() {
        let mut presence = registry();
        let now = Instant::now();

        assert!(!presence.heartbeat_at(TransportKind::Broadcast, Participant::new("me", "Me"), now));
        presence.heartbeat_at(TransportKind::Broadcast, Participant::new("bob", "Bob"), now);

        let online = presence.online_at(now);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id.as_str(), "bob");

        // Full rosters that include us still never surface us
        presence.replace_roster_at(
            TransportKind::Relay,
            vec![fresh("me", "Me"), fresh("bob", "Bob")],
            now,
        );
        assert!(presence.online_at(now).iter().all(|p| p.id.as_str() != "me"));
    }

    #[test]
    fn test_liveness_timeout() {
        let mut presence = registry();
        let start = Instant::now();

        presence.heartbeat_at(TransportKind::Polling, Participant::new("bob", "Bob"), start);
        presence.heartbeat_at(TransportKind::Polling, Participant::new("eve", "Eve"), start);

        // Eve keeps heartbeating, Bob goes silent
        presence.heartbeat_at(
            TransportKind::Polling,
            Participant::new("eve", "Eve"),
            start + Duration::from_secs(25),
        );

        let later = start + Duration::from_secs(31);
        let online = presence.online_at(later);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].id.as_str(), "eve");

        let departed = presence.sweep_at(later);
        assert_eq!(departed.len(), 1);
        assert_eq!(departed[0].id.as_str(), "bob");
        assert!(!presence.contains(&ParticipantId::new("bob")));
    }

    #[test]
    fn test_union_across_sources() {
        let mut presence = registry();
        let now = Instant::now();

        assert!(presence.heartbeat_at(TransportKind::Broadcast, Participant::new("bob", "Bob"), now));
        assert!(!presence.heartbeat_at(TransportKind::Relay, Participant::new("bob", "Bob"), now));
        assert_eq!(presence.online_at(now).len(), 1);

        // Leaving one source keeps the participant online
        assert!(presence
            .leave(TransportKind::Broadcast, &ParticipantId::new("bob"))
            .is_none());
        assert_eq!(presence.online_at(now).len(), 1);

        let left = presence.leave(TransportKind::Relay, &ParticipantId::new("bob"));
        assert_eq!(left.unwrap().id.as_str(), "bob");
        assert!(presence.online_at(now).is_empty());
    }

    #[test]
    fn test_replace_roster_delta() {
        let mut presence = registry();
        let now = Instant::now();

        let delta = presence.replace_roster_at(
            TransportKind::Relay,
            vec![fresh("a", "A"), fresh("b", "B")],
            now,
        );
        assert_eq!(delta.joined.len(), 2);
        assert!(delta.left.is_empty());

        let delta = presence.replace_roster_at(
            TransportKind::Relay,
            vec![fresh("b", "B"), fresh("c", "C")],
            now,
        );
        assert_eq!(delta.joined.len(), 1);
        assert_eq!(delta.joined[0].id.as_str(), "c");
        assert_eq!(delta.left.len(), 1);
        assert_eq!(delta.left[0].id.as_str(), "a");
    }

    #[test]
    fn test_clear_source() {
        let mut presence = registry();
        let now = Instant::now();

        presence.heartbeat_at(TransportKind::Relay, Participant::new("a", "A"), now);
        presence.heartbeat_at(TransportKind::Relay, Participant::new("b", "B"), now);
        presence.heartbeat_at(TransportKind::Polling, Participant::new("b", "B"), now);

        let departed = presence.clear_source(TransportKind::Relay);
        assert_eq!(departed.len(), 1);
        assert_eq!(departed[0].id.as_str(), "a");
        assert_eq!(presence.len(), 1);
    }

    #[test]
    fn test_rejoin_after_timeout_counts_as_join() {
        let mut presence = registry();
        let start = Instant::now();

        presence.heartbeat_at(TransportKind::Polling, Participant::new("bob", "Bob"), start);
        let back = presence.heartbeat_at(
            TransportKind::Polling,
            Participant::new("bob", "Bob"),
            start + Duration::from_secs(45),
        );
        assert!(back);
    }

    #[test]
    fn test_listed_but_idle_member_expires() {
        let mut presence = registry();
        let start = Instant::now();
        let ghost = Participant::new("ghost", "Ghost");

        let delta = presence.replace_roster_at(
            TransportKind::Relay,
            vec![RosterEntry::idle(ghost.clone(), Duration::from_secs(5))],
            start,
        );
        assert_eq!(delta.joined.len(), 1);

        // Still listed every few seconds, but its idle time keeps growing
        presence.replace_roster_at(
            TransportKind::Relay,
            vec![RosterEntry::idle(ghost.clone(), Duration::from_secs(25))],
            start + Duration::from_secs(20),
        );
        assert!(presence.online_at(start + Duration::from_secs(31)).is_empty());

        let delta = presence.replace_roster_at(
            TransportKind::Relay,
            vec![RosterEntry::idle(ghost, Duration::from_secs(45))],
            start + Duration::from_secs(40),
        );
        assert_eq!(delta.left.len(), 1);
        assert!(!presence.contains(&ParticipantId::new("ghost")));
    }
}
