//! Session service: the lease contract the outer HTTP layer calls.
//!
//! A session grants one user a timed lease on a server group. Creating a
//! session marks the group's servers wanted-on; ending or expiring it marks
//! them wanted-off. The [`lifecycle`] worker drives everything after that.

pub mod lifecycle;

use std::time::Duration;

use ez2boot_core::config::parse_duration;
use ez2boot_core::db::unix_timestamp;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use crate::storage::{
    CatalogDatabase, DatabaseError, GroupSummary, NewSessionParams, SessionSnapshot,
};

pub use lifecycle::{LifecycleReport, SessionLifecycle, SessionTask};

/// Errors surfaced to session API callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Server group not found: {0}")]
    ServerGroupNotFound(String),

    #[error("Server group already has an active session: {0}")]
    ServerGroupInUse(String),

    #[error("Session not found or expired")]
    SessionNotFound,

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<DatabaseError> for SessionError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

/// Result of opening a lease. `token` is the only copy of the bearer token.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub token: String,
    pub server_group: String,
    pub duration: String,
    pub expiry: i64,
}

#[derive(Debug, Clone)]
pub struct ExtendedSession {
    pub server_group: String,
    pub duration: String,
    pub expiry: i64,
}

/// Hash a session token for storage (raw tokens are never persisted).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn parse_lease(duration: &str) -> Result<(Duration, i64), SessionError> {
    let parsed =
        parse_duration(duration).map_err(|e| SessionError::InvalidDuration(e.to_string()))?;
    let secs = i64::try_from(parsed.as_secs())
        .map_err(|_| SessionError::InvalidDuration(format!("{duration} is too long")))?;
    Ok((parsed, secs))
}

fn expiry_after(now: i64, secs: i64, duration: &str) -> Result<i64, SessionError> {
    now.checked_add(secs)
        .ok_or_else(|| SessionError::InvalidDuration(format!("{duration} is too long")))
}

#[derive(Clone)]
pub struct SessionService {
    db: CatalogDatabase,
}

impl SessionService {
    pub const fn new(db: CatalogDatabase) -> Self {
        Self { db }
    }

    /// Open a lease on `server_group` for `duration` (humantime syntax).
    #[instrument(skip(self, email))]
    pub async fn create_session(
        &self,
        user_id: &str,
        email: &str,
        server_group: &str,
        duration: &str,
    ) -> Result<CreatedSession, SessionError> {
        let (parsed, secs) = parse_lease(duration)?;
        let now = unix_timestamp();
        let expiry = expiry_after(now, secs, duration)?;

        let token = uuid::Uuid::new_v4().to_string();
        let token_hash = hash_token(&token);
        let params = NewSessionParams {
            token_hash: &token_hash,
            user_id,
            email,
            server_group,
            expiry,
        };

        self.db
            .create_session(params, now)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => {
                    SessionError::ServerGroupNotFound(server_group.to_string())
                }
                DatabaseError::Conflict(_) => {
                    SessionError::ServerGroupInUse(server_group.to_string())
                }
                other => other.into(),
            })?;

        info!(server_group, expiry, "Session created");
        Ok(CreatedSession {
            token,
            server_group: server_group.to_string(),
            duration: humantime::format_duration(parsed).to_string(),
            expiry,
        })
    }

    /// Push a live lease's expiry to `now + duration` and re-arm its warning.
    ///
    /// A lease whose expiry is exactly now counts as gone and yields
    /// `SessionNotFound`, one tick before the lifecycle worker ends it.
    #[instrument(skip(self, token))]
    pub async fn extend_session(
        &self,
        token: &str,
        duration: &str,
    ) -> Result<ExtendedSession, SessionError> {
        let (parsed, secs) = parse_lease(duration)?;
        let now = unix_timestamp();
        let expiry = expiry_after(now, secs, duration)?;

        let session = self
            .db
            .extend_session(&hash_token(token), expiry, now)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => SessionError::SessionNotFound,
                other => other.into(),
            })?;

        info!(server_group = %session.server_group, expiry, "Session extended");
        Ok(ExtendedSession {
            server_group: session.server_group,
            duration: humantime::format_duration(parsed).to_string(),
            expiry,
        })
    }

    /// End a lease early. Returns the released group.
    #[instrument(skip(self, token))]
    pub async fn end_session(&self, token: &str) -> Result<String, SessionError> {
        let server_group = self
            .db
            .end_session_by_token(&hash_token(token), unix_timestamp())
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => SessionError::SessionNotFound,
                other => other.into(),
            })?;

        info!(server_group = %server_group, "Session ended by user");
        Ok(server_group)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSnapshot>, SessionError> {
        Ok(self.db.list_sessions().await?)
    }

    pub async fn group_summary(&self) -> Result<Vec<GroupSummary>, SessionError> {
        Ok(self.db.group_summaries().await?)
    }
}
