//! Relay Hub - in-process fan-out of chat messages and notifications
//!
//! The hub keeps an index of live connections by owning user and by
//! subscribed group, and pushes serialized payloads into each connection's
//! bounded outbound queue. It knows nothing about HTTP or websockets: a
//! transport adapter hands it a [`Frame`] stream and sink and the pump
//! drives the reader and writer loops.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relay_hub::{ChatMessage, Envelope, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Arc::new(Hub::new(HubConfig::default()));
//!
//!     let (conn, mut outbox) = hub.connect("user-b", None);
//!     hub.register("user-b", &conn).await;
//!
//!     let msg = ChatMessage::direct("user-a", "user-b", "hello");
//!     hub.send_message(&Envelope::Direct(msg)).await.unwrap();
//!
//!     let payload = outbox.recv().await.unwrap();
//!     println!("queued for user-b: {}", payload);
//! }
//! ```

mod config;
mod connection;
mod envelope;
mod error;
mod hub;
pub mod pump;
mod registry;

pub use config::{HubConfig, SlowConsumerPolicy};
pub use connection::{ConnectionHandle, ConnectionId, ConnectionState, Outbox, Payload};
pub use envelope::{ChatMessage, ControlMessage, Envelope, Notification, Route, timestamp_now};
pub use error::{EnqueueError, HubError};
pub use hub::{DeliveryReport, Hub, HubStats, HubStatsSnapshot};
pub use pump::{Disconnect, ForwardingHandler, Frame, InboundHandler, serve_connection};
pub use registry::{Purged, Registry};
