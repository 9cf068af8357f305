// Repository layer: each domain lives in its own file with `impl SocialRepository`.

use sqlx::sqlite::SqlitePool;

mod chat;
mod groups;
mod notifications;
mod sessions;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

/// Maximum rows returned by the history and notification list endpoints
pub const HISTORY_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct SocialRepository {
    pub(crate) pool: SqlitePool,
}

impl SocialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
