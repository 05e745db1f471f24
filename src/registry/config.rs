//! Registry configuration

use std::time::Duration;

/// Room registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each room's broadcast channel
    pub broadcast_capacity: usize,

    /// How long an unreferenced room keeps its state
    pub idle_room_timeout: Duration,

    /// Interval of the background cleanup task
    pub cleanup_interval: Duration,

    /// Maximum messages cached per room for late joiners
    pub max_history: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            idle_room_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
            max_history: 1000,
        }
    }
}

impl RegistryConfig {
    /// Set broadcast channel capacity
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set the idle room timeout
    pub fn idle_room_timeout(mut self, timeout: Duration) -> Self {
        self.idle_room_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Set the per-room history limit
    pub fn max_history(mut self, max: usize) -> Self {
        self.max_history = max.max(1);
        self
    }
}
