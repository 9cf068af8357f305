use anyhow::Result;
use chrono::{DateTime, Utc};

use super::SocialRepository;
use crate::models::Session;

impl SocialRepository {
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT id, user_id, expires_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Look up a session and return it only if it has not expired at `now`.
    pub async fn get_valid_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        Ok(self.get_session(id).await?.filter(|s| !s.is_expired(now)))
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every session that has expired. Returns the number removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let sessions = sqlx::query_as::<_, Session>("SELECT id, user_id, expires_at FROM sessions")
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now();
        let mut removed = 0;
        for session in sessions.iter().filter(|s| s.is_expired(now)) {
            self.delete_session(&session.id).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

// Sessions are issued by the login service; tests mint their own.
#[cfg(test)]
impl SocialRepository {
    /// Create a session for `user_id` that expires after `ttl`.
    pub async fn create_session(
        &self,
        user_id: &str,
        ttl: chrono::Duration,
        user_agent: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: (now + ttl).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };
        sqlx::query(
            "INSERT INTO sessions (id, user_id, expires_at, user_agent, ip, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.expires_at)
        .bind(user_agent)
        .bind(ip)
        .bind(now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .execute(&self.pool)
        .await?;
        Ok(session)
    }
}
