//! Inbound chat frames: check access, persist, then relay the stored envelope.

use std::sync::Arc;

use relay_hub::{ChatMessage, ConnectionHandle, Envelope, Hub, InboundHandler};
use tracing::{debug, error, warn};

use crate::metrics::ServerMetrics;
use crate::repository::SocialRepository;

/// Dispatcher for websocket control messages. A chat message is stored
/// before it is relayed; a failed write means nobody receives it.
#[derive(Clone)]
pub struct ChatDispatcher {
    repository: Arc<SocialRepository>,
    metrics: Arc<ServerMetrics>,
}

impl ChatDispatcher {
    pub fn new(repository: Arc<SocialRepository>, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            repository,
            metrics,
        }
    }

    async fn may_use_group(&self, group_id: &str, user_id: &str) -> bool {
        match self.repository.can_access_group(group_id, user_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(group = %group_id, user = %user_id, "Group access check failed: {:#}", e);
                false
            }
        }
    }

    async fn sender_name(&self, user_id: &str) -> String {
        match self.repository.user_display_name(user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(user = %user_id, "Sender name lookup failed: {:#}", e);
                String::new()
            }
        }
    }
}

/// Recipients get the same envelope the HTTP send path relays.
async fn relay(hub: &Hub, envelope: &Envelope) {
    if let Err(e) = hub.send_message(envelope).await {
        warn!(kind = envelope.kind(), "Chat envelope not relayed: {}", e);
    }
}

impl InboundHandler for ChatDispatcher {
    async fn on_subscribe_group(&self, hub: &Hub, conn: &ConnectionHandle, group_id: &str) {
        if !self.may_use_group(group_id, conn.user_id()).await {
            warn!(conn_id = %conn.id(), user = %conn.user_id(), group = %group_id, "Subscribe refused: not a member");
            return;
        }
        hub.subscribe_to_group(group_id, conn).await;
    }

    async fn on_direct(&self, hub: &Hub, conn: &ConnectionHandle, to: &str, text: &str, _raw: &str) {
        self.metrics.message_received();

        match self.repository.user_exists(to).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(conn_id = %conn.id(), to = %to, "Direct message to unknown user discarded");
                return;
            }
            Err(e) => {
                error!("Recipient lookup failed: {:#}", e);
                return;
            }
        }

        let msg = ChatMessage::direct(conn.user_id(), to, text)
            .with_sender_name(self.sender_name(conn.user_id()).await);
        if let Err(e) = self.repository.insert_direct_message(&msg).await {
            self.metrics.database_error();
            error!(conn_id = %conn.id(), "Failed to store direct message: {:#}", e);
            return;
        }
        self.metrics.message_persisted();

        relay(hub, &Envelope::Direct(msg)).await;
    }

    async fn on_group(&self, hub: &Hub, conn: &ConnectionHandle, to: &str, text: &str, _raw: &str) {
        self.metrics.message_received();

        if !self.may_use_group(to, conn.user_id()).await {
            warn!(conn_id = %conn.id(), user = %conn.user_id(), group = %to, "Group message refused: not a member");
            return;
        }

        let msg = ChatMessage::group(conn.user_id(), to, text)
            .with_sender_name(self.sender_name(conn.user_id()).await);
        if let Err(e) = self.repository.insert_group_message(&msg).await {
            self.metrics.database_error();
            error!(conn_id = %conn.id(), "Failed to store group message: {:#}", e);
            return;
        }
        self.metrics.message_persisted();

        relay(hub, &Envelope::Group(msg)).await;
    }
}
