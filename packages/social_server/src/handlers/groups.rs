//! Group membership workflow: create, invite, accept, request, approve.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::notifications::notify;
use crate::models::{CreateGroupRequest, Group, InviteRequest, NotificationRecord, PendingReply};

async fn load_group(state: &AppState, group_id: &str) -> Result<Group, ApiError> {
    state
        .repository
        .get_group(group_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("group not found".into()))
}

fn accepted() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "accepted" }))
}

pub async fn create_group(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("title is required".into()));
    }
    let group = state
        .repository
        .create_group(&user.user_id, title, req.description.trim())
        .await?;
    info!(group = %group.id, owner = %user.user_id, "Group created");
    Ok(Json(group))
}

pub async fn invite_to_group(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> Result<Json<PendingReply>, ApiError> {
    let group = load_group(&state, &group_id).await?;
    if !state.repository.can_access_group(&group.id, &user.user_id).await? {
        return Err(ApiError::Forbidden("only members can invite".into()));
    }
    if req.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".into()));
    }
    if !state.repository.user_exists(&req.user_id).await? {
        return Err(ApiError::NotFound("user not found".into()));
    }
    if state.repository.can_access_group(&group.id, &req.user_id).await? {
        return Err(ApiError::Conflict("already a member".into()));
    }

    let invitation_id = state
        .repository
        .create_invitation(&group.id, &user.user_id, &req.user_id)
        .await?
        .ok_or_else(|| ApiError::Conflict("invitation already pending".into()))?;

    let inviter = state.repository.user_display_name(&user.user_id).await?;
    let record = NotificationRecord::new(
        &req.user_id,
        "group_invite",
        &format!("{} invited you to join {}", inviter, group.title),
    )
    .with_actor(&user.user_id)
    .with_subject(&invitation_id)
    .with_action_url(format!("/groups/{}", group.id));
    notify(&state, record).await;

    Ok(Json(PendingReply::new(invitation_id)))
}

pub async fn accept_invitation(
    State(state): State<AppState>,
    user: AuthUser,
    Path((group_id, invitation_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let accepted_now = state
        .repository
        .accept_invitation(&group_id, &invitation_id, &user.user_id)
        .await?;
    if !accepted_now {
        return Err(ApiError::NotFound("invitation not found".into()));
    }
    info!(group = %group_id, user = %user.user_id, "Invitation accepted");
    Ok(accepted())
}

pub async fn request_to_join(
    State(state): State<AppState>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<Json<PendingReply>, ApiError> {
    let group = load_group(&state, &group_id).await?;
    if state.repository.can_access_group(&group.id, &user.user_id).await? {
        return Err(ApiError::Conflict("already a member".into()));
    }

    let request_id = state
        .repository
        .create_join_request(&group.id, &user.user_id)
        .await?
        .ok_or_else(|| ApiError::Conflict("request already pending".into()))?;

    let requester = state.repository.user_display_name(&user.user_id).await?;
    let record = NotificationRecord::new(
        &group.owner_user_id,
        "group_join_request",
        &format!("{} asked to join {}", requester, group.title),
    )
    .with_actor(&user.user_id)
    .with_subject(&request_id)
    .with_action_url(format!("/groups/{}", group.id));
    notify(&state, record).await;

    Ok(Json(PendingReply::new(request_id)))
}

pub async fn accept_join_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path((group_id, request_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let group = load_group(&state, &group_id).await?;
    if group.owner_user_id != user.user_id {
        return Err(ApiError::Forbidden("only the owner can accept requests".into()));
    }

    let requester = state
        .repository
        .accept_join_request(&group.id, &request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("request not found".into()))?;

    let record = NotificationRecord::new(
        &requester,
        "group_join_accepted",
        &format!("Your request to join {} was accepted", group.title),
    )
    .with_actor(&user.user_id)
    .with_subject(&group.id)
    .with_action_url(format!("/groups/{}", group.id));
    notify(&state, record).await;

    info!(group = %group.id, user = %requester, "Join request accepted");
    Ok(accepted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{authed_request, read_json, test_app_state};
    use axum::{Router, http::StatusCode, routing::post};
    use tower::ServiceExt;

    fn groups_router(state: AppState) -> Router {
        Router::new()
            .route("/api/groups", post(create_group))
            .route("/api/groups/{id}/invite", post(invite_to_group))
            .route(
                "/api/groups/{id}/invitations/{invitation_id}/accept",
                post(accept_invitation),
            )
            .route("/api/groups/{id}/requests", post(request_to_join))
            .route(
                "/api/groups/{id}/requests/{request_id}/accept",
                post(accept_join_request),
            )
            .with_state(state)
    }

    async fn post_as(
        state: &AppState,
        user: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let resp = groups_router(state.clone())
            .oneshot(authed_request("POST", uri, user, body))
            .await
            .unwrap();
        let status = resp.status();
        (status, read_json(resp).await)
    }

    async fn new_group(state: &AppState, owner: &str) -> String {
        let (status, json) = post_as(
            state,
            owner,
            "/api/groups",
            Some(serde_json::json!({ "title": "Hikers", "description": "Weekend trails" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        json["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn create_requires_title_and_enrols_owner() {
        let (state, _tmp) = test_app_state(&["alice"]).await;

        let (status, _) = post_as(
            &state,
            "alice",
            "/api/groups",
            Some(serde_json::json!({ "title": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let group_id = new_group(&state, "alice").await;
        let group = state.repository.get_group(&group_id).await.unwrap().unwrap();
        assert_eq!(group.owner_user_id, "alice");
        assert_eq!(group.description, "Weekend trails");
        assert!(state.repository.can_access_group(&group_id, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn invite_then_accept() {
        let (state, _tmp) = test_app_state(&["alice", "bob", "carol"]).await;
        let group_id = new_group(&state, "alice").await;
        let invite_uri = format!("/api/groups/{}/invite", group_id);

        // outsiders cannot invite
        let (status, _) = post_as(
            &state,
            "carol",
            &invite_uri,
            Some(serde_json::json!({ "user_id": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = post_as(&state, "alice", &invite_uri, Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = post_as(
            &state,
            "alice",
            &invite_uri,
            Some(serde_json::json!({ "user_id": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "pending");
        let invitation_id = json["id"].as_str().unwrap().to_string();

        let (status, _) = post_as(
            &state,
            "alice",
            &invite_uri,
            Some(serde_json::json!({ "user_id": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let notes = state.repository.list_notifications("bob").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "group_invite");
        assert_eq!(notes[0].actor_user_id.as_deref(), Some("alice"));
        assert_eq!(notes[0].subject_id.as_deref(), Some(invitation_id.as_str()));
        assert_eq!(notes[0].message, "Alice Test invited you to join Hikers");

        let accept_uri = format!("/api/groups/{}/invitations/{}/accept", group_id, invitation_id);
        // only the invitee may accept
        let (status, _) = post_as(&state, "carol", &accept_uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = post_as(&state, "bob", &accept_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "accepted");
        assert!(state.repository.can_access_group(&group_id, "bob").await.unwrap());

        let (status, _) = post_as(&state, "bob", &accept_uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn join_request_needs_owner_approval() {
        let (state, _tmp) = test_app_state(&["alice", "bob", "carol"]).await;
        let group_id = new_group(&state, "alice").await;
        let (alice_conn, mut alice_out) = state.hub.connect("alice", None);
        state.hub.register("alice", &alice_conn).await;

        let (status, json) =
            post_as(&state, "bob", &format!("/api/groups/{}/requests", group_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "pending");
        let request_id = json["id"].as_str().unwrap().to_string();

        // the owner hears about it live
        let pushed: serde_json::Value =
            serde_json::from_str(&alice_out.try_recv().unwrap()).unwrap();
        assert_eq!(pushed["type"], "notification");
        assert_eq!(pushed["message"], "Bob Test asked to join Hikers");

        let (status, _) =
            post_as(&state, "alice", &format!("/api/groups/{}/requests", group_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let accept_uri = format!("/api/groups/{}/requests/{}/accept", group_id, request_id);
        let (status, _) = post_as(&state, "carol", &accept_uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!state.repository.can_access_group(&group_id, "bob").await.unwrap());

        let (status, json) = post_as(&state, "alice", &accept_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "accepted");
        assert!(state.repository.can_access_group(&group_id, "bob").await.unwrap());

        let notes = state.repository.list_notifications("bob").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, "group_join_accepted");

        let (status, _) = post_as(&state, "alice", &accept_uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let (state, _tmp) = test_app_state(&["alice"]).await;
        let (status, json) = post_as(&state, "alice", "/api/groups/nope/requests", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "group not found");
    }
}
