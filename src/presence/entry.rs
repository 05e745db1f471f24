//! Per-participant presence entry

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::Participant;
use crate::transport::TransportKind;

/// Presence signals for a single participant, one timestamp per source
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub participant: Participant,
    sources: HashMap<TransportKind, Instant>,
}

impl PresenceEntry {
    pub(super) fn new(participant: Participant) -> Self {
        Self {
            participant,
            sources: HashMap::new(),
        }
    }

    /// Record a signal from `source`
    pub(super) fn touch(&mut self, source: TransportKind, now: Instant) {
        self.sources.insert(source, now);
    }

    /// Drop one source. Returns `true` if no source remains.
    pub(super) fn forget(&mut self, source: TransportKind) -> bool {
        self.sources.remove(&source);
        self.sources.is_empty()
    }

    /// Drop sources not refreshed within `window`. Returns `true` if none remain.
    pub(super) fn expire(&mut self, now: Instant, window: Duration) -> bool {
        self.sources
            .retain(|_, seen| now.saturating_duration_since(*seen) <= window);
        self.sources.is_empty()
    }

    /// Most recent signal from any source
    pub fn last_seen(&self) -> Option<Instant> {
        self.sources.values().max().copied()
    }

    /// Whether any source is still within the window
    pub fn is_live(&self, now: Instant, window: Duration) -> bool {
        self.last_seen()
            .map(|seen| now.saturating_duration_since(seen) <= window)
            .unwrap_or(false)
    }

    /// Whether `source` currently reports this participant
    pub fn seen_via(&self, source: TransportKind) -> bool {
        self.sources.contains_key(&source)
    }

    /// Number of transports reporting this participant
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
