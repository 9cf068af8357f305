use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::ws;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Group to subscribe the connection to on admission
    pub group_id: Option<String>,
}

/// Admit an authenticated client and hand the socket to the hub.
pub async fn websocket_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let initial_group = params.group_id.filter(|g| !g.is_empty());

    if let Some(group_id) = &initial_group {
        match state
            .repository
            .can_access_group(group_id, &user.user_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return ApiError::Forbidden("not a member of this group".into()).into_response();
            }
            Err(e) => return ApiError::Internal(e).into_response(),
        }
    }

    debug!(user = %user.user_id, group = initial_group.as_deref().unwrap_or(""), "Upgrading websocket");

    let limit = state.hub.config().transport_limit();
    let hub = state.hub.clone();
    let repository = state.repository.clone();
    let metrics = state.metrics.clone();

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            ws::handle_chat_ws(socket, user.user_id, initial_group, hub, repository, metrics)
                .await;
        })
}
