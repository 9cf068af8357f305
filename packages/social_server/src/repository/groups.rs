use anyhow::{Context, Result};
use relay_hub::timestamp_now;

use super::SocialRepository;
use crate::models::Group;

const INSERT_MEMBER: &str = "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
     VALUES (?, ?, ?, ?)";

impl SocialRepository {
    /// Create a group and enrol its owner with the `owner` role.
    pub async fn create_group(
        &self,
        owner_user_id: &str,
        title: &str,
        description: &str,
    ) -> Result<Group> {
        let group = Group {
            id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            created_at: timestamp_now(),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO groups (id, owner_user_id, title, description, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&group.id)
        .bind(&group.owner_user_id)
        .bind(&group.title)
        .bind(&group.description)
        .bind(&group.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert group")?;

        sqlx::query(INSERT_MEMBER)
            .bind(&group.id)
            .bind(owner_user_id)
            .bind("owner")
            .bind(&group.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to enrol group owner")?;

        tx.commit().await?;
        Ok(group)
    }

    pub async fn get_group(&self, id: &str) -> Result<Option<Group>> {
        let group = sqlx::query_as::<_, Group>(
            "SELECT id, owner_user_id, title, description, created_at FROM groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(group)
    }

    /// True if `user_id` is a member or the owner of `group_id`.
    pub async fn can_access_group(&self, group_id: &str, user_id: &str) -> Result<bool> {
        let allowed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members WHERE group_id = ? AND user_id = ?
            ) OR EXISTS(
                SELECT 1 FROM groups WHERE id = ? AND owner_user_id = ?
            )
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(allowed)
    }

    /// Record a pending invitation. `None` when one is already open for
    /// this user and group.
    pub async fn create_invitation(
        &self,
        group_id: &str,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<Option<String>> {
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO group_invitations
                 (id, group_id, from_user_id, to_user_id, status, created_at)
             VALUES (?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&id)
        .bind(group_id)
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await
        .context("Failed to insert invitation")?;
        Ok((result.rows_affected() > 0).then_some(id))
    }

    /// Accept a pending invitation addressed to `user_id` and enrol them.
    /// Returns false when no such invitation is pending.
    pub async fn accept_invitation(
        &self,
        group_id: &str,
        invitation_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE group_invitations SET status = 'accepted'
             WHERE id = ? AND group_id = ? AND to_user_id = ? AND status = 'pending'",
        )
        .bind(invitation_id)
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(INSERT_MEMBER)
            .bind(group_id)
            .bind(user_id)
            .bind("member")
            .bind(timestamp_now())
            .execute(&mut *tx)
            .await
            .context("Failed to add group member")?;

        tx.commit().await?;
        Ok(true)
    }

    /// Record a pending join request. `None` when one is already open.
    pub async fn create_join_request(&self, group_id: &str, user_id: &str) -> Result<Option<String>> {
        let id = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO group_requests (id, group_id, user_id, status, created_at)
             VALUES (?, ?, ?, 'pending', ?)",
        )
        .bind(&id)
        .bind(group_id)
        .bind(user_id)
        .bind(timestamp_now())
        .execute(&self.pool)
        .await
        .context("Failed to insert join request")?;
        Ok((result.rows_affected() > 0).then_some(id))
    }

    /// Approve a pending join request and enrol the requester, whose id is
    /// returned. `None` when no such request is pending.
    pub async fn accept_join_request(&self, group_id: &str, request_id: &str) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;
        let requester: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM group_requests WHERE id = ? AND group_id = ? AND status = 'pending'",
        )
        .bind(request_id)
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(requester) = requester else {
            return Ok(None);
        };

        sqlx::query(INSERT_MEMBER)
            .bind(group_id)
            .bind(&requester)
            .bind("member")
            .bind(timestamp_now())
            .execute(&mut *tx)
            .await
            .context("Failed to add group member")?;

        sqlx::query("UPDATE group_requests SET status = 'accepted' WHERE id = ?")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(requester))
    }
}

#[cfg(test)]
impl SocialRepository {
    pub(crate) async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(INSERT_MEMBER)
            .bind(group_id)
            .bind(user_id)
            .bind("member")
            .bind(timestamp_now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
