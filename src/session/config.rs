//! Sync session configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::server::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::transport::TransportKind;

/// Sync session configuration options
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Participants unheard from for this long are considered offline
    pub liveness_window: Duration,

    /// Interval of presence heartbeats and presence sweeps
    pub heartbeat_interval: Duration,

    /// Interval of the polling transport
    pub poll_interval: Duration,

    /// Reconnect attempts before a transport gives up
    pub max_reconnect_attempts: u32,

    /// Base of the linear reconnect backoff (`base * attempt`)
    pub reconnect_base_delay: Duration,

    /// Timeout of a single connection attempt
    pub connect_timeout: Duration,

    /// Transports to try, most preferred first
    pub transport_order: Vec<TransportKind>,

    /// Relay server address (relay transport unavailable without one)
    pub relay_addr: Option<SocketAddr>,

    /// Capacity of transport and session event channels
    pub event_capacity: usize,

    /// Maximum relay frame payload size
    pub max_frame_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            transport_order: TransportKind::preference(),
            relay_addr: None,
            event_capacity: 256,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SyncConfig {
    /// Create a config that prefers the relay at `addr`
    pub fn with_relay(addr: SocketAddr) -> Self {
        Self {
            relay_addr: Some(addr),
            ..Default::default()
        }
    }

    /// Set the liveness window
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set reconnect attempts
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the reconnect backoff base
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set transport preference order
    pub fn transport_order(mut self, order: Vec<TransportKind>) -> Self {
        self.transport_order = order;
        self
    }

    /// Set the relay address
    pub fn relay_addr(mut self, addr: SocketAddr) -> Self {
        self.relay_addr = Some(addr);
        self
    }

    /// Set event channel capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Set maximum relay frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}
