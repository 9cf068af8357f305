use axum::{
    Json,
    extract::{Path, State},
};
use relay_hub::{ChatMessage, Envelope};
use tracing::{info, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::notifications::notify;
use crate::models::{
    ConversationSummary, DirectMessageView, GroupMessageView, NotificationRecord,
    SendDirectRequest, SendGroupRequest,
};

/// Push a stored chat envelope to whoever is online. Delivery problems are
/// logged; the message is already persisted.
async fn relay(state: &AppState, envelope: &Envelope) {
    if let Err(e) = state.hub.send_message(envelope).await {
        warn!(kind = envelope.kind(), "Chat envelope not relayed: {}", e);
    }
}

async fn require_group_access(state: &AppState, group_id: &str, user_id: &str) -> Result<(), ApiError> {
    if state.repository.can_access_group(group_id, user_id).await? {
        Ok(())
    } else {
        Err(ApiError::Forbidden("forbidden".into()))
    }
}

pub async fn send_direct_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<SendDirectRequest>,
) -> Result<Json<Envelope>, ApiError> {
    if req.content.is_empty() || req.recipient_id.is_empty() {
        return Err(ApiError::BadRequest("recipient_id and content are required".into()));
    }
    if !state.repository.user_exists(&req.recipient_id).await? {
        return Err(ApiError::NotFound("recipient not found".into()));
    }
    state.metrics.message_received();

    let sender_name = state.repository.user_display_name(&user.user_id).await?;
    let msg = ChatMessage::direct(&user.user_id, &req.recipient_id, &req.content)
        .with_sender_name(sender_name.clone());
    if let Err(e) = state.repository.insert_direct_message(&msg).await {
        state.metrics.database_error();
        return Err(e.into());
    }
    state.metrics.message_persisted();

    // Offline recipients hear about it the next time they look at notifications.
    // The message is already stored, so a failed notification does not fail the send.
    if !state.hub.registry().is_user_online(&req.recipient_id).await {
        let record = NotificationRecord::new(
            &req.recipient_id,
            "direct_message",
            &format!("{} sent you a message", sender_name),
        )
        .with_actor(&user.user_id)
        .with_subject(&msg.id)
        .with_action_url(format!("/chat/{}", user.user_id));
        notify(&state, record).await;
    }

    let envelope = Envelope::Direct(msg);
    relay(&state, &envelope).await;
    Ok(Json(envelope))
}

pub async fn list_direct_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(other_user_id): Path<String>,
) -> Result<Json<Vec<DirectMessageView>>, ApiError> {
    let messages = state
        .repository
        .list_direct_messages(&user.user_id, &other_user_id)
        .await?;
    Ok(Json(messages))
}

pub async fn send_group_message(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
    Json(req): Json<SendGroupRequest>,
) -> Result<Json<Envelope>, ApiError> {
    require_group_access(&state, &group_id, &user.user_id).await?;
    if req.content.is_empty() {
        return Err(ApiError::BadRequest("content is required".into()));
    }
    state.metrics.message_received();

    let sender_name = state.repository.user_display_name(&user.user_id).await?;
    let msg = ChatMessage::group(&user.user_id, &group_id, &req.content).with_sender_name(sender_name);
    if let Err(e) = state.repository.insert_group_message(&msg).await {
        state.metrics.database_error();
        return Err(e.into());
    }
    state.metrics.message_persisted();

    let envelope = Envelope::Group(msg);
    relay(&state, &envelope).await;
    Ok(Json(envelope))
}

pub async fn list_group_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<Json<Vec<GroupMessageView>>, ApiError> {
    require_group_access(&state, &group_id, &user.user_id).await?;
    let messages = state
        .repository
        .list_group_messages(&group_id, &user.user_id)
        .await?;
    Ok(Json(messages))
}

pub async fn mark_message_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state
        .repository
        .mark_direct_message_read(&message_id, &user.user_id)
        .await?;
    if updated {
        info!(user = %user.user_id, message = %message_id, "Direct message read");
    }
    Ok(Json(serde_json::json!({ "status": "success" })))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    Ok(Json(state.repository.list_conversations(&user.user_id).await?))
}
