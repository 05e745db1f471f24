//! Statistics and metrics for sync sessions

use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Messages composed locally
    pub messages_sent: u64,
    /// Messages received from any transport that were new
    pub messages_received: u64,
    /// Messages received that were already known
    pub duplicates_dropped: u64,
    /// Messages waiting for a transport
    pub queued: u64,
    /// Successful reconnections of the active transport
    pub reconnects: u64,
    /// Times the session moved to a lower-preference transport
    pub fallbacks: u64,
    /// Rooms joined
    pub rooms_joined: u64,
    /// When the session was created
    pub started_at: Instant,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            messages_sent: 0,
            messages_received: 0,
            duplicates_dropped: 0,
            queued: 0,
            reconnects: 0,
            fallbacks: 0,
            rooms_joined: 0,
            started_at: Instant::now(),
        }
    }

    /// Time since the session was created
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Record a batch of incoming messages, `added` of which were new
    pub fn record_received(&mut self, total: usize, added: usize) {
        self.messages_received += added as u64;
        self.duplicates_dropped += total.saturating_sub(added) as u64;
    }

    /// Fraction of incoming messages that were duplicates
    pub fn duplicate_ratio(&self) -> f64 {
        let total = self.messages_received + self.duplicates_dropped;
        if total > 0 {
            self.duplicates_dropped as f64 / total as f64
        } else {
            0.0
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay server statistics
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Total connections ever
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    /// Rooms with state on the relay
    pub rooms: u64,
    /// Messages accepted and fanned out
    pub messages_relayed: u64,
    /// Members disconnected for falling behind
    pub members_evicted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.messages_received, 0);
        assert_eq!(stats.duplicates_dropped, 0);
        assert_eq!(stats.reconnects, 0);
        assert_eq!(stats.fallbacks, 0);
    }

    #[test]
    fn test_record_received() {
        let mut stats = SessionStats::new();
        stats.record_received(5, 3);
        stats.record_received(2, 2);

        assert_eq!(stats.messages_received, 5);
        assert_eq!(stats.duplicates_dropped, 2);
        assert!((stats.duplicate_ratio() - 2.0 / 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_ratio_zero() {
        let stats = SessionStats::new();
        assert_eq!(stats.duplicate_ratio(), 0.0);
    }

    #[test]
    fn test_relay_stats_default() {
        let stats = RelayStats::default();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.messages_relayed, 0);
    }
}
