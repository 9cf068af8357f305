//! WebSocket chat sessions
//!
//! One socket per client device. The socket is registered with the hub under
//! the authenticated user and, optionally, an initial group; the relay_hub
//! pump then runs the read and write loops until either side goes away.

mod dispatch;
mod socket;

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use relay_hub::{Disconnect, Hub};
use tracing::warn;

use crate::metrics::ServerMetrics;
use crate::repository::SocialRepository;

pub use dispatch::ChatDispatcher;
pub use socket::split_socket;

/// Serve one upgraded socket for `user_id` until it disconnects.
pub async fn handle_chat_ws(
    socket: WebSocket,
    user_id: String,
    initial_group: Option<String>,
    hub: Arc<Hub>,
    repository: Arc<SocialRepository>,
    metrics: Arc<ServerMetrics>,
) -> Option<Disconnect> {
    let (conn, outbox) = hub.connect(&user_id, initial_group);
    if !hub.register(&user_id, &conn).await {
        warn!(user = %user_id, "Could not register websocket connection");
        return None;
    }

    metrics.connection_opened();
    let (stream, sink) = split_socket(socket);
    let dispatcher = Arc::new(ChatDispatcher::new(repository, metrics.clone()));
    let reason = relay_hub::serve_connection(hub, conn, outbox, stream, sink, dispatcher).await;
    metrics.connection_closed(&reason);
    Some(reason)
}
