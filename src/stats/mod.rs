//! Statistics for sync sessions and the relay server

pub mod metrics;

pub use metrics::{RelayStats, SessionStats};
