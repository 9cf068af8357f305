//! Server metrics for observability
//!
//! Connection and error counters kept by the server itself. Delivery counters
//! live in the hub and are merged into the snapshot by the metrics handler.

use relay_hub::{Disconnect, HubStatsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Connections reaped by the liveness timeout
    pub timed_out_connections: AtomicU64,

    // Message metrics
    /// Chat messages received from clients (WebSocket or REST)
    pub messages_received: AtomicU64,
    /// Chat messages written to the database
    pub messages_persisted: AtomicU64,
    /// Notifications written and pushed
    pub notifications_sent: AtomicU64,

    // Error metrics
    /// WebSocket read errors
    pub websocket_errors: AtomicU64,
    /// Failed database writes from the chat paths
    pub database_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished connection and why it ended.
    pub fn connection_closed(&self, reason: &Disconnect) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        match reason {
            Disconnect::TimedOut => {
                self.timed_out_connections.fetch_add(1, Ordering::Relaxed);
            }
            Disconnect::ReadError(_) => {
                self.websocket_errors.fetch_add(1, Ordering::Relaxed);
            }
            Disconnect::PeerClosed | Disconnect::WriterClosed => {}
        }
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn database_error(&self) {
        self.database_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self, hub: HubStatsSnapshot, presence: PresenceMetrics) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                timed_out: self.timed_out_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                persisted: self.messages_persisted.load(Ordering::Relaxed),
                notifications: self.notifications_sent.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                websocket: self.websocket_errors.load(Ordering::Relaxed),
                database: self.database_errors.load(Ordering::Relaxed),
            },
            hub,
            presence,
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
    pub hub: HubStatsSnapshot,
    pub presence: PresenceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub persisted: u64,
    pub notifications: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
    pub database: u64,
}

/// Registry sizes at snapshot time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceMetrics {
    pub online_users: u64,
    pub active_groups: u64,
    pub registered_connections: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub connections: u64,
    pub online_users: u64,
    pub uptime_secs: u64,
}
