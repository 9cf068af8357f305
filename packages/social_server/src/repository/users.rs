use anyhow::Result;

use super::SocialRepository;
use crate::models::User;

impl SocialRepository {
    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, first_name, last_name, nickname, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn user_exists(&self, id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// Display name for message envelopes. Empty when the user is unknown.
    pub async fn user_display_name(&self, id: &str) -> Result<String> {
        Ok(self
            .get_user(id)
            .await?
            .map(|u| u.display_name())
            .unwrap_or_default())
    }
}

// Accounts are created by the registration service; tests seed their own.
#[cfg(test)]
impl SocialRepository {
    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, nickname, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.nickname)
        .bind(&user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
