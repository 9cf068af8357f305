use anyhow::{Context, Result};
use relay_hub::{ChatMessage, timestamp_now};
use sqlx::Row;

use super::{HISTORY_LIMIT, SocialRepository};
use crate::models::{ConversationSummary, DirectMessageView, GroupMessageView};

fn full_name(first: String, last: String) -> String {
    format!("{} {}", first, last).trim().to_string()
}

impl SocialRepository {
    /// Persist a direct message. `msg.recipient_id` must be set.
    pub async fn insert_direct_message(&self, msg: &ChatMessage) -> Result<()> {
        let recipient = msg
            .recipient_id
            .as_deref()
            .context("direct message has no recipient")?;
        sqlx::query(
            "INSERT INTO direct_messages (id, sender_id, recipient_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.sender_id)
        .bind(recipient)
        .bind(&msg.content)
        .bind(&msg.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert direct message")?;
        Ok(())
    }

    /// Persist a group message. `msg.group_id` must be set.
    pub async fn insert_group_message(&self, msg: &ChatMessage) -> Result<()> {
        let group_id = msg
            .group_id
            .as_deref()
            .context("group message has no group")?;
        sqlx::query(
            "INSERT INTO group_messages (id, group_id, sender_id, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(group_id)
        .bind(&msg.sender_id)
        .bind(&msg.content)
        .bind(&msg.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert group message")?;
        Ok(())
    }

    /// The latest messages exchanged between `me` and `other`, oldest first.
    pub async fn list_direct_messages(
        &self,
        me: &str,
        other: &str,
    ) -> Result<Vec<DirectMessageView>> {
        let rows = sqlx::query(
            r#"
            SELECT dm.id, dm.sender_id, dm.recipient_id, dm.content, dm.created_at, dm.read_at,
                   u.first_name, u.last_name
            FROM direct_messages dm
            JOIN users u ON u.id = dm.sender_id
            WHERE (dm.sender_id = ? AND dm.recipient_id = ?)
               OR (dm.sender_id = ? AND dm.recipient_id = ?)
            ORDER BY dm.created_at DESC, dm.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(me)
        .bind(other)
        .bind(other)
        .bind(me)
        .bind(HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<DirectMessageView> = rows
            .into_iter()
            .map(|r| {
                let sender_id: String = r.get("sender_id");
                DirectMessageView {
                    id: r.get("id"),
                    is_from_me: sender_id == me,
                    sender_name: full_name(r.get("first_name"), r.get("last_name")),
                    sender_id,
                    recipient_id: r.get("recipient_id"),
                    content: r.get("content"),
                    created_at: r.get("created_at"),
                    read_at: r.get("read_at"),
                }
            })
            .collect();

        messages.reverse();
        Ok(messages)
    }

    /// The latest messages posted to `group_id`, oldest first.
    pub async fn list_group_messages(
        &self,
        group_id: &str,
        me: &str,
    ) -> Result<Vec<GroupMessageView>> {
        let rows = sqlx::query(
            r#"
            SELECT gm.id, gm.group_id, gm.sender_id, gm.content, gm.created_at,
                   u.first_name, u.last_name
            FROM group_messages gm
            JOIN users u ON u.id = gm.sender_id
            WHERE gm.group_id = ?
            ORDER BY gm.created_at DESC, gm.rowid DESC
            LIMIT ?
            "#,
        )
        .bind(group_id)
        .bind(HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<GroupMessageView> = rows
            .into_iter()
            .map(|r| {
                let sender_id: String = r.get("sender_id");
                GroupMessageView {
                    id: r.get("id"),
                    group_id: r.get("group_id"),
                    is_from_me: sender_id == me,
                    sender_name: full_name(r.get("first_name"), r.get("last_name")),
                    sender_id,
                    content: r.get("content"),
                    created_at: r.get("created_at"),
                }
            })
            .collect();

        messages.reverse();
        Ok(messages)
    }

    /// Mark a direct message read. Only its recipient may do so; returns
    /// whether a row was updated.
    pub async fn mark_direct_message_read(&self, message_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE direct_messages SET read_at = ?
             WHERE id = ? AND recipient_id = ? AND read_at IS NULL",
        )
        .bind(timestamp_now())
        .bind(message_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One summary per peer `user_id` has exchanged direct messages with,
    /// most recent first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r#"
            WITH convo AS (
                SELECT CASE WHEN sender_id = ? THEN recipient_id ELSE sender_id END AS other_user_id,
                       recipient_id, content, created_at, read_at, rowid AS seq
                FROM direct_messages
                WHERE sender_id = ? OR recipient_id = ?
            ),
            ranked AS (
                SELECT other_user_id, content, created_at,
                       ROW_NUMBER() OVER (
                           PARTITION BY other_user_id ORDER BY created_at DESC, seq DESC
                       ) AS rn
                FROM convo
            )
            SELECT r.other_user_id, u.first_name, u.last_name,
                   r.content AS last_message, r.created_at AS last_message_time,
                   (SELECT COUNT(*) FROM convo c
                    WHERE c.other_user_id = r.other_user_id
                      AND c.recipient_id = ? AND c.read_at IS NULL) AS unread_count
            FROM ranked r
            JOIN users u ON u.id = r.other_user_id
            WHERE r.rn = 1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ConversationSummary {
                user_id: r.get("other_user_id"),
                user_name: full_name(r.get("first_name"), r.get("last_name")),
                last_message: r.get("last_message"),
                last_message_time: r.get("last_message_time"),
                unread_count: r.get("unread_count"),
                kind: "direct".to_string(),
            })
            .collect())
    }
}
