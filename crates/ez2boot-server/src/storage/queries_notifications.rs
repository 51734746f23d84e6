//! Notification queue and per-user channel setting queries.

use ez2boot_core::db::unix_timestamp;
use sqlx::SqliteConnection;

use super::db::{CatalogDatabase, DatabaseError};
use super::models::{NotificationQueueEntry, PendingNotification, UserNotificationSetting};

/// Queue a notification on an open connection or transaction.
///
/// Lifecycle steps call this inside their own transaction so that a flag
/// flip and its notification commit or roll back together.
pub async fn enqueue_notification(
    conn: &mut SqliteConnection,
    user_id: &str,
    title: &str,
    message: &str,
    now: i64,
) -> Result<i64, DatabaseError> {
    let result = sqlx::query(
        "INSERT INTO notification_queue (user_id, message, title, time_added) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(message)
    .bind(title)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

impl CatalogDatabase {
    // =========================================================================
    // Queue
    // =========================================================================

    /// Queue a notification outside of any other transaction.
    pub async fn enqueue_notification(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
    ) -> Result<i64, DatabaseError> {
        let mut conn = self.pool().acquire().await?;
        enqueue_notification(&mut conn, user_id, title, message, unix_timestamp()).await
    }

    /// Queued entries joined with the recipient's channel, oldest first.
    ///
    /// Entries whose user has no channel setting are not returned.
    pub async fn pending_notifications(&self) -> Result<Vec<PendingNotification>, DatabaseError> {
        let rows = sqlx::query_as::<_, PendingNotification>(
            "SELECT q.id, q.user_id, q.message, q.title, u.type AS channel_type, u.config \
             FROM notification_queue q \
             JOIN user_notifications u ON u.user_id = q.user_id \
             ORDER BY q.time_added, q.id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Delete queued entries whose user has no channel setting.
    ///
    /// Returns the number of entries removed.
    pub async fn purge_orphaned_notifications(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM notification_queue \
             WHERE user_id NOT IN (SELECT user_id FROM user_notifications)",
        )
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Returns `true` if the entry existed.
    pub async fn delete_notification(&self, id: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM notification_queue WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_queued_notifications(
        &self,
    ) -> Result<Vec<NotificationQueueEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, NotificationQueueEntry>(
            "SELECT * FROM notification_queue ORDER BY time_added, id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Channel settings
    // =========================================================================

    /// Store or replace a user's delivery channel.
    pub async fn set_user_notification(
        &self,
        user_id: &str,
        channel_type: &str,
        config: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO user_notifications (user_id, type, config) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET type = excluded.type, config = excluded.config",
        )
        .bind(user_id)
        .bind(channel_type)
        .bind(config)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    pub async fn get_user_notification(
        &self,
        user_id: &str,
    ) -> Result<Option<UserNotificationSetting>, DatabaseError> {
        let setting = sqlx::query_as::<_, UserNotificationSetting>(
            "SELECT * FROM user_notifications WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(setting)
    }

    /// Returns `true` if a setting was deleted.
    pub async fn delete_user_notification(&self, user_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM user_notifications WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
