//! Session layer
//!
//! [`SyncSession`] picks a transport per room (first viable in preference
//! order), keeps the message log and presence roster current, and exposes
//! them as one view.

pub mod config;
mod pump;
pub mod state;
pub mod sync;

pub use config::SyncConfig;
pub use state::{ConnectionStatus, SessionEvent};
pub use sync::SyncSession;
