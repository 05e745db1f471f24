//! Relay server configuration

use std::net::SocketAddr;
use std::time::Duration;

use super::codec::DEFAULT_MAX_FRAME_SIZE;

/// Relay server configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Disconnect a client that sends nothing for this long
    pub idle_timeout: Duration,

    /// Maximum frame payload size in bytes
    pub max_frame_size: usize,

    /// Messages kept per room for joiners
    pub room_history: usize,

    /// Outbound frames queued per connection before dropping
    pub outbound_queue: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_connections: 0, // Unlimited
            idle_timeout: Duration::from_secs(90),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            room_history: 1000,
            outbound_queue: 256,
            tcp_nodelay: true,
            read_buffer_size: 16 * 1024,
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set per-room history
    pub fn room_history(mut self, messages: usize) -> Self {
        self.room_history = messages.max(1);
        self
    }
}
