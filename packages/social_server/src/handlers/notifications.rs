use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::NotificationRecord;

/// Store a notification and push it to the user's live connections.
///
/// Notifications ride along with some other write that has already
/// succeeded, so a failure here is logged and counted, never returned.
/// Yields the record only when it was stored.
pub async fn notify(state: &AppState, record: NotificationRecord) -> Option<NotificationRecord> {
    if let Err(e) = state.repository.insert_notification(&record).await {
        state.metrics.database_error();
        error!(user = %record.user_id, kind = %record.kind, "Failed to store notification: {:#}", e);
        return None;
    }
    match state.hub.send_notification(&record.to_envelope()).await {
        Ok(report) => {
            debug!(user = %record.user_id, kind = %record.kind, delivered = report.delivered, "Notification sent");
        }
        Err(e) => warn!(user = %record.user_id, "Notification not pushed: {}", e),
    }
    state.metrics.notification_sent();
    Some(record)
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<NotificationRecord>>, ApiError> {
    Ok(Json(state.repository.list_notifications(&user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct MarkReadQuery {
    #[serde(default)]
    id: String,
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MarkReadQuery>,
) -> Result<StatusCode, ApiError> {
    if query.id.is_empty() {
        return Err(ApiError::BadRequest("id is required".into()));
    }
    state
        .repository
        .mark_notification_read(&query.id, &user.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
