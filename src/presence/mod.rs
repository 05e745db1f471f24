//! Presence tracking
//!
//! Keeps the "who is online" set for one room. Every transport reports
//! presence signals independently (awareness updates, relay rosters,
//! polling heartbeats); the registry keys them by participant id so a
//! participant seen through two transports is counted once.
//!
//! Entries expire when no source has refreshed them within the liveness
//! window, even if no explicit leave was ever received. The local
//! participant is never part of the view.

pub mod entry;
pub mod registry;

pub use entry::PresenceEntry;
pub use registry::{PresenceRegistry, RosterDelta};
