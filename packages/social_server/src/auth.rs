//! Session authentication.
//!
//! The `sid` cookie names a row in `sessions`. The middleware resolves it to
//! an [`AuthUser`] stored in request extensions; handlers take `AuthUser` as
//! an extractor and get a 401 when it is missing.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Cookie, HeaderMapExt};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};

use crate::repository::SocialRepository;

pub const SESSION_COOKIE: &str = "sid";

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub session_id: String,
}

#[derive(Clone)]
pub struct AuthState {
    pub repository: Arc<SocialRepository>,
}

/// Pull the session id out of the request's Cookie header.
fn session_id(headers: &HeaderMap) -> Option<String> {
    let cookie = headers.typed_get::<Cookie>()?;
    cookie
        .get(SESSION_COOKIE)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve the session cookie for every non-public route.
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public_route(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(sid) = session_id(request.headers()) else {
        return unauthorized();
    };

    match auth_state
        .repository
        .get_valid_session(&sid, Utc::now())
        .await
    {
        Ok(Some(session)) => {
            request.extensions_mut().insert(AuthUser {
                user_id: session.user_id,
                session_id: session.id,
            });
            next.run(request).await
        }
        Ok(None) => {
            debug!("Rejected unknown or expired session");
            unauthorized()
        }
        Err(e) => {
            error!("Session lookup failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "Authentication required" })),
    )
        .into_response()
}

fn is_public_route(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/") || path == "/metrics"
}

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
        })
    }
}
