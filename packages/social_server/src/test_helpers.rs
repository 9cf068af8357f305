use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, header},
    response::Response,
};
use relay_hub::{Hub, HubConfig};

use crate::AppState;
use crate::auth::{AuthUser, SESSION_COOKIE};
use crate::config::{ServerConfig, ServerFileConfig, SocialConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::models::User;
use crate::repository::SocialRepository;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database,
/// with one seeded user per id ("alice" → Alice Test).
///
/// Returns `(AppState, TempDir)`; hold the `TempDir` for the lifetime of the
/// test so the data directory stays valid.
pub async fn test_app_state(users: &[&str]) -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = SocialConfig::new(Some(tmp.path().to_path_buf())).expect("config");

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let repository = Arc::new(SocialRepository::new(pool.clone()));
    for id in users {
        let mut first = id.to_string();
        if let Some(c) = first.get_mut(0..1) {
            c.make_ascii_uppercase();
        }
        let user = User::new(id, &format!("{}@example.com", id), &first, "Test");
        repository.create_user(&user).await.expect("seed user");
    }

    let state = AppState {
        config: Arc::new(config),
        server_config: Arc::new(ServerConfig::from_file(&ServerFileConfig::default())),
        hub: Arc::new(Hub::new(HubConfig::default())),
        metrics: Arc::new(ServerMetrics::new()),
        db: Arc::new(Database { pool }),
        repository,
    };

    (state, tmp)
}

/// A request that already carries `user` as the authenticated caller, as the
/// auth middleware would leave it.
pub fn authed_request(
    method: &str,
    uri: &str,
    user: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let mut req = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    req.extensions_mut().insert(AuthUser {
        user_id: user.to_string(),
        session_id: "test-session".to_string(),
    });
    req
}

/// Create a live session for `user_id` and return the Cookie header value.
pub async fn session_cookie(state: &AppState, user_id: &str) -> String {
    let session = state
        .repository
        .create_session(user_id, chrono::Duration::hours(1), None, None)
        .await
        .expect("session");
    format!("{}={}", SESSION_COOKIE, session.id)
}

pub async fn read_json(resp: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
