use sqlx::sqlite::SqlitePoolOptions;

use crate::models::User;

/// Create a fresh SocialRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::SocialRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::SocialRepository::new(pool)
}

/// Insert a user named after its id ("alice" → Alice Test).
pub async fn seed_user(repo: &super::SocialRepository, id: &str) -> User {
    let mut first = id.to_string();
    if let Some(c) = first.get_mut(0..1) {
        c.make_ascii_uppercase();
    }
    let user = User::new(id, &format!("{}@example.com", id), &first, "Test");
    repo.create_user(&user).await.expect("seed user");
    user
}
