use anyhow::{Context, Result};
use relay_hub::timestamp_now;

use super::{HISTORY_LIMIT, SocialRepository};
use crate::models::NotificationRecord;

impl SocialRepository {
    pub async fn insert_notification(&self, n: &NotificationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, type, actor_user_id, subject_id, message, action_url, created_at, read_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&n.id)
        .bind(&n.user_id)
        .bind(&n.kind)
        .bind(&n.actor_user_id)
        .bind(&n.subject_id)
        .bind(&n.message)
        .bind(&n.action_url)
        .bind(&n.created_at)
        .bind(&n.read_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert notification")?;
        Ok(())
    }

    /// The caller's latest notifications, newest first.
    pub async fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, type, actor_user_id, subject_id, message, action_url, created_at, read_at
            FROM notifications
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Mark one of `user_id`'s notifications read. Returns whether a row changed.
    pub async fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE id = ? AND user_id = ? AND read_at IS NULL",
        )
        .bind(timestamp_now())
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
