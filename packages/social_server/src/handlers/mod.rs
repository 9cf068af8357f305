pub mod chat;
pub mod groups;
pub mod health;
pub mod notifications;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use chat::{
    list_conversations, list_direct_messages, list_group_messages, mark_message_read,
    send_direct_message, send_group_message,
};
pub use groups::{
    accept_invitation, accept_join_request, create_group, invite_to_group, request_to_join,
};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use notifications::{list_notifications, mark_notification_read};
pub use websocket::websocket_handler;
