//! In-memory session directory

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{now_millis, Participant, RoomId};

use super::types::{NewSession, SessionRecord, SessionToken, ShareLink};
use super::{DirectoryError, SessionDirectory};

const DEFAULT_LINK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Invitation {
    token: SessionToken,
    expires_at: u64,
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    sessions: RwLock<HashMap<SessionToken, SessionRecord>>,
    invitations: RwLock<HashMap<String, Invitation>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired sessions and invitations; returns sessions removed
    pub async fn purge_expired(&self) -> usize {
        let now = now_millis();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now));
        let removed = before - sessions.len();
        drop(sessions);

        self.invitations
            .write()
            .await
            .retain(|_, inv| now < inv.expires_at);

        if removed > 0 {
            tracing::debug!(removed, "Expired sessions purged");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn add_member(
        &self,
        token: &SessionToken,
        participant: &Participant,
    ) -> Result<SessionRecord, DirectoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(token).ok_or(DirectoryError::NotFound)?;
        if record.is_expired() {
            return Err(DirectoryError::Expired);
        }
        if !record.members.contains(&participant.id) {
            record.members.push(participant.id.clone());
            tracing::info!(session = %token, participant = %participant.id, "Joined session");
        }
        Ok(record.clone())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl SessionDirectory for MemoryDirectory {
    async fn create_session(&self, params: NewSession) -> Result<SessionRecord, DirectoryError> {
        let name = params.name.trim();
        if name.is_empty() {
            return Err(DirectoryError::EmptyField("name"));
        }

        let token = SessionToken::new();
        let now = now_millis();
        let record = SessionRecord {
            token,
            room_id: params
                .room_id
                .unwrap_or_else(|| RoomId::new(format!("session-{token}"))),
            creator_id: params.creator.clone(),
            name: name.to_string(),
            created_at: now,
            expires_at: now.saturating_add(millis(params.ttl)),
            relay_addr: params.relay_addr,
            members: vec![params.creator],
        };

        tracing::info!(session = %token, room = %record.room_id, "Session created");
        self.sessions.write().await.insert(token, record.clone());
        Ok(record)
    }

    async fn get_session(&self, token: &SessionToken) -> Result<SessionRecord, DirectoryError> {
        let sessions = self.sessions.read().await;
        let record = sessions.get(token).ok_or(DirectoryError::NotFound)?;
        if record.is_expired() {
            return Err(DirectoryError::Expired);
        }
        Ok(record.clone())
    }

    async fn join_session(
        &self,
        token: &SessionToken,
        participant: &Participant,
    ) -> Result<SessionRecord, DirectoryError> {
        self.add_member(token, participant).await
    }

    async fn generate_share_link(
        &self,
        token: &SessionToken,
        ttl: Option<Duration>,
    ) -> Result<ShareLink, DirectoryError> {
        let record = self.get_session(token).await?;

        // A link never outlives its session
        let wanted = now_millis().saturating_add(millis(ttl.unwrap_or(DEFAULT_LINK_TTL)));
        let expires_at = wanted.min(record.expires_at);
        let invitation = Uuid::new_v4().simple().to_string();

        self.invitations.write().await.insert(
            invitation.clone(),
            Invitation {
                token: *token,
                expires_at,
            },
        );
        tracing::debug!(session = %token, "Share link generated");

        Ok(ShareLink {
            token: *token,
            room_id: record.room_id,
            invitation,
            expires_at,
        })
    }

    async fn join_session_by_link(
        &self,
        token: &SessionToken,
        invitation: &str,
        participant: &Participant,
    ) -> Result<SessionRecord, DirectoryError> {
        let valid = self
            .invitations
            .read()
            .await
            .get(invitation)
            .is_some_and(|inv| inv.token == *token && now_millis() < inv.expires_at);
        if !valid {
            return Err(DirectoryError::InvalidInvitation);
        }
        self.add_member(token, participant).await
    }

    async fn delete_session(
        &self,
        token: &SessionToken,
        requested_by: &Participant,
    ) -> Result<(), DirectoryError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get(token).ok_or(DirectoryError::NotFound)?;
        if record.creator_id != requested_by.id {
            return Err(DirectoryError::Forbidden);
        }
        sessions.remove(token);
        drop(sessions);

        self.invitations
            .write()
            .await
            .retain(|_, inv| inv.token != *token);
        tracing::info!(session = %token, "Session deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParticipantId;
    use tokio_test::{assert_err, assert_ok};

    fn alice() -> Participant {
        Participant::new("alice", "Alice")
    }

    fn bob() -> Participant {
        Participant::new("bob", "Bob")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let directory = MemoryDirectory::new();
        let record = directory
            .create_session(NewSession::new(ParticipantId::new("alice"), " Standup ").relay_addr("127.0.0.1:8000"))
            .await
            .unwrap();

        assert_eq!(record.name, "Standup");
        assert!(record.room_id.as_str().starts_with("session-"));
        assert_eq!(record.members, vec![ParticipantId::new("alice")]);

        let fetched = directory.get_session(&record.token).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(
            directory.get_session(&SessionToken::new()).await,
            Err(DirectoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_rejects_blank_name() {
        let directory = MemoryDirectory::new();
        let err = directory
            .create_session(NewSession::new(ParticipantId::new("alice"), "  "))
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::EmptyField("name"));
    }

    #[tokio::test]
    async fn test_share_link_flow() {
        let directory = MemoryDirectory::new();
        let record = directory
            .create_session(NewSession::new(alice().id, "Design review").room(RoomId::new("design")))
            .await
            .unwrap();

        let link = directory.generate_share_link(&record.token, None).await.unwrap();
        assert_eq!(link.room_id, RoomId::new("design"));
        assert!(link.expires_at <= record.expires_at);
        assert!(link.path().contains(&link.invitation));

        let joined = directory
            .join_session_by_link(&record.token, &link.invitation, &bob())
            .await
            .unwrap();
        assert_eq!(joined.members.len(), 2);

        // Joining twice does not duplicate membership
        let again = directory
            .join_session_by_link(&record.token, &link.invitation, &bob())
            .await
            .unwrap();
        assert_eq!(again.members.len(), 2);

        let err = directory
            .join_session_by_link(&record.token, "bogus", &bob())
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::InvalidInvitation);
    }

    #[tokio::test]
    async fn test_expiry() {
        let directory = MemoryDirectory::new();
        let record = directory
            .create_session(NewSession::new(alice().id, "Brief").ttl(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(directory.get_session(&record.token).await, Err(DirectoryError::Expired));
        assert_eq!(
            directory.join_session(&record.token, &bob()).await,
            Err(DirectoryError::Expired)
        );
        assert_eq!(directory.purge_expired().await, 1);
        assert_eq!(directory.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_only_by_creator() {
        let directory = MemoryDirectory::new();
        let record = directory
            .create_session(NewSession::new(alice().id, "Retro"))
            .await
            .unwrap();
        let link = directory.generate_share_link(&record.token, None).await.unwrap();

        let err = assert_err!(directory.delete_session(&record.token, &bob()).await);
        assert_eq!(err, DirectoryError::Forbidden);
        assert_ok!(directory.delete_session(&record.token, &alice()).await);

        assert_eq!(directory.get_session(&record.token).await, Err(DirectoryError::NotFound));
        assert_eq!(
            directory
                .join_session_by_link(&record.token, &link.invitation, &bob())
                .await,
            Err(DirectoryError::InvalidInvitation)
        );
    }
}
