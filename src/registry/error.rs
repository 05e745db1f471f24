//! Registry error types

use thiserror::Error;

use crate::model::RoomId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Room not found (never acquired or already cleaned up)
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Handle was already released
    #[error("handle {handle} already released from room {room}")]
    HandleReleased { room: RoomId, handle: u64 },
}
