//! Session directory
//!
//! Backend records for collaboration sessions: who created a session,
//! which room it maps to, when it expires and how to invite others.
//! [`SessionDirectory`] is the storage seam; [`MemoryDirectory`] keeps
//! everything in process.

mod memory;
mod types;

pub use memory::MemoryDirectory;
pub use types::{NewSession, SessionRecord, SessionToken, ShareLink};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Participant;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("invitation is invalid or expired")]
    InvalidInvitation,

    #[error("only the creator may do this")]
    Forbidden,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

/// Storage of collaboration sessions
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Create a session
    async fn create_session(&self, params: NewSession) -> Result<SessionRecord, DirectoryError>;

    /// Look up a live session
    async fn get_session(&self, token: &SessionToken) -> Result<SessionRecord, DirectoryError>;

    /// Add a participant to a live session
    async fn join_session(
        &self,
        token: &SessionToken,
        participant: &Participant,
    ) -> Result<SessionRecord, DirectoryError>;

    /// Issue an invitation to a live session
    async fn generate_share_link(
        &self,
        token: &SessionToken,
        ttl: Option<std::time::Duration>,
    ) -> Result<ShareLink, DirectoryError>;

    /// Join through an invitation
    async fn join_session_by_link(
        &self,
        token: &SessionToken,
        invitation: &str,
        participant: &Participant,
    ) -> Result<SessionRecord, DirectoryError>;

    /// Delete a session; only its creator may
    async fn delete_session(
        &self,
        token: &SessionToken,
        requested_by: &Participant,
    ) -> Result<(), DirectoryError>;
}
