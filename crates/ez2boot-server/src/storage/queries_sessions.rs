//! Lease queries: creation, extension, termination and the lifecycle
//! handshake flags.
//!
//! Every guarded write treats zero affected rows as "already handled or lost
//! a race" and rolls its transaction back.

use super::db::{CatalogDatabase, DatabaseError};
use super::models::{ServerSession, SessionSnapshot};
use super::queries_notifications::enqueue_notification;

/// Parameters for opening a lease.
#[derive(Debug, Clone, Copy)]
pub struct NewSessionParams<'a> {
    pub token_hash: &'a str,
    pub user_id: &'a str,
    pub email: &'a str,
    pub server_group: &'a str,
    pub expiry: i64,
}

/// A notification to queue alongside a flag change.
#[derive(Debug, Clone, Copy)]
pub struct QueuedMessage<'a> {
    pub title: &'a str,
    pub message: &'a str,
}

impl CatalogDatabase {
    /// Open a lease on a server group.
    ///
    /// Marks every server in the group `next_state = 'on'` and inserts the
    /// session with `to_notify = 1` in one transaction. Fails with
    /// `NotFound` when the group has no servers and `Conflict` when the group
    /// already has a session.
    pub async fn create_session(
        &self,
        params: NewSessionParams<'_>,
        now: i64,
    ) -> Result<ServerSession, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE servers SET next_state = 'on', last_user = ?, time_last_on = ? \
             WHERE server_group = ?",
        )
        .bind(params.email)
        .bind(now)
        .bind(params.server_group)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DatabaseError::NotFound(format!(
                "Server group {}",
                params.server_group
            )));
        }

        let session = sqlx::query_as::<_, ServerSession>(
            "INSERT INTO server_sessions (token, user_id, email, server_group, expiry, to_notify) \
             VALUES (?, ?, ?, ?, ?, 1) RETURNING *",
        )
        .bind(params.token_hash)
        .bind(params.user_id)
        .bind(params.email)
        .bind(params.server_group)
        .bind(params.expiry)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    /// Move the expiry of a live lease and re-arm its warning.
    ///
    /// Only matches sessions whose token is known and whose expiry is still
    /// in the future. Returns the updated row. A lease with `expiry == now`
    /// is already refused here even though the lifecycle tick only ends it
    /// once `expiry < now`.
    pub async fn extend_session(
        &self,
        token_hash: &str,
        expiry: i64,
        now: i64,
    ) -> Result<ServerSession, DatabaseError> {
        sqlx::query_as::<_, ServerSession>(
            "UPDATE server_sessions SET expiry = ?, warning_notified = 0 \
             WHERE token = ? AND expiry > ? RETURNING *",
        )
        .bind(expiry)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DatabaseError::NotFound("Session".to_string()))
    }

    /// Terminate the open lease on a group.
    ///
    /// Clears the token, raises `to_notify` and `to_cleanup`, and sets the
    /// group's servers to `next_state = 'off'`. Returns `false` when the group
    /// has no open lease.
    pub async fn end_session(&self, server_group: &str, now: i64) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE server_sessions SET token = NULL, to_notify = 1, to_cleanup = 1 \
             WHERE server_group = ? AND to_cleanup = 0",
        )
        .bind(server_group)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        stop_group(&mut tx, server_group, now).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Terminate the open lease identified by a token digest.
    ///
    /// Returns the group that was released.
    pub async fn end_session_by_token(
        &self,
        token_hash: &str,
        now: i64,
    ) -> Result<String, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let server_group: Option<String> = sqlx::query_scalar(
            "UPDATE server_sessions SET token = NULL, to_notify = 1, to_cleanup = 1 \
             WHERE token = ? AND to_cleanup = 0 RETURNING server_group",
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(server_group) = server_group else {
            tx.rollback().await?;
            return Err(DatabaseError::NotFound("Session".to_string()));
        };

        stop_group(&mut tx, &server_group, now).await?;
        tx.commit().await?;
        Ok(server_group)
    }

    pub async fn get_session_by_group(
        &self,
        server_group: &str,
    ) -> Result<Option<ServerSession>, DatabaseError> {
        let session = sqlx::query_as::<_, ServerSession>(
            "SELECT * FROM server_sessions WHERE server_group = ?",
        )
        .bind(server_group)
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    /// Every session row, without token digests.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSnapshot>, DatabaseError> {
        let sessions = sqlx::query_as::<_, SessionSnapshot>(
            "SELECT user_id, email, server_group, expiry, to_cleanup \
             FROM server_sessions ORDER BY server_group",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    // =========================================================================
    // Lifecycle handshake
    // =========================================================================

    /// Sessions that have not been terminated.
    pub async fn active_sessions(&self) -> Result<Vec<ServerSession>, DatabaseError> {
        let sessions = sqlx::query_as::<_, ServerSession>(
            "SELECT * FROM server_sessions WHERE to_cleanup = 0 ORDER BY expiry",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Set `warning_notified` and queue the warning together.
    ///
    /// Returns `false` if the session was already warned or terminated.
    pub async fn mark_warning_notified(
        &self,
        session: &ServerSession,
        notice: QueuedMessage<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        self.flip_flag_and_enqueue(
            "UPDATE server_sessions SET warning_notified = 1 \
             WHERE id = ? AND warning_notified = 0 AND to_cleanup = 0",
            session,
            notice,
            now,
        )
        .await
    }

    /// Sessions with a pending start or end announcement.
    pub async fn sessions_to_announce(&self) -> Result<Vec<ServerSession>, DatabaseError> {
        let sessions = sqlx::query_as::<_, ServerSession>(
            "SELECT * FROM server_sessions WHERE to_notify = 1 ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Clear `to_notify` and queue the announcement together.
    pub async fn mark_announced(
        &self,
        session: &ServerSession,
        notice: QueuedMessage<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        self.flip_flag_and_enqueue(
            "UPDATE server_sessions SET to_notify = 0 WHERE id = ? AND to_notify = 1",
            session,
            notice,
            now,
        )
        .await
    }

    /// Terminated sessions whose group has observably reached `off`.
    ///
    /// A group qualifies when no server in it is observably on, transitioning
    /// or still wanted on; a group without servers qualifies too. A server
    /// that is off with no desired state does not hold the group. Sessions
    /// still waiting for their end announcement are skipped.
    pub async fn sessions_ready_for_cleanup(&self) -> Result<Vec<ServerSession>, DatabaseError> {
        let sessions = sqlx::query_as::<_, ServerSession>(
            "SELECT s.* FROM server_sessions s \
             WHERE s.to_cleanup = 1 AND s.to_notify = 0 \
               AND NOT EXISTS ( \
                 SELECT 1 FROM servers v \
                 WHERE v.server_group = s.server_group \
                   AND (v.state != 'off' OR v.next_state != 'off') \
               ) \
             ORDER BY s.id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Set `off_notified` and queue the "servers off" notice together.
    pub async fn mark_off_notified(
        &self,
        session: &ServerSession,
        notice: QueuedMessage<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        self.flip_flag_and_enqueue(
            "UPDATE server_sessions SET off_notified = 1 \
             WHERE id = ? AND to_cleanup = 1 AND off_notified = 0",
            session,
            notice,
            now,
        )
        .await
    }

    /// Delete a finished session and clear its group's desired state.
    ///
    /// Only deletes sessions that are terminated and already sent their
    /// "servers off" notice.
    pub async fn finalize_session(&self, session: &ServerSession) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM server_sessions WHERE id = ? AND to_cleanup = 1 AND off_notified = 1",
        )
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE servers SET next_state = NULL WHERE server_group = ?")
            .bind(&session.server_group)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Live sessions whose whole group is observably on and not yet
    /// announced as ready. A server without a desired state only holds the
    /// group back while it is not `on`.
    pub async fn sessions_ready_for_use(&self) -> Result<Vec<ServerSession>, DatabaseError> {
        let sessions = sqlx::query_as::<_, ServerSession>(
            "SELECT s.* FROM server_sessions s \
             WHERE s.to_cleanup = 0 AND s.on_notified = 0 \
               AND EXISTS (SELECT 1 FROM servers v WHERE v.server_group = s.server_group) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM servers v \
                 WHERE v.server_group = s.server_group \
                   AND (v.state != 'on' OR v.next_state != 'on') \
               ) \
             ORDER BY s.id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(sessions)
    }

    /// Set `on_notified` and queue the "ready" notice together.
    pub async fn mark_on_notified(
        &self,
        session: &ServerSession,
        notice: QueuedMessage<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        self.flip_flag_and_enqueue(
            "UPDATE server_sessions SET on_notified = 1 \
             WHERE id = ? AND to_cleanup = 0 AND on_notified = 0",
            session,
            notice,
            now,
        )
        .await
    }

    async fn flip_flag_and_enqueue(
        &self,
        guarded_update: &'static str,
        session: &ServerSession,
        notice: QueuedMessage<'_>,
        now: i64,
    ) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(guarded_update)
            .bind(session.id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        enqueue_notification(&mut tx, &session.user_id, notice.title, notice.message, now).await?;
        tx.commit().await?;
        Ok(true)
    }
}

async fn stop_group(
    conn: &mut sqlx::SqliteConnection,
    server_group: &str,
    now: i64,
) -> Result<(), DatabaseError> {
    sqlx::query("UPDATE servers SET next_state = 'off', time_last_off = ? WHERE server_group = ?")
        .bind(now)
        .bind(server_group)
        .execute(conn)
        .await?;

    Ok(())
}
