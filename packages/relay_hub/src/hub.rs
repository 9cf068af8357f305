//! Hub: connection lifecycle and fan-out
//!
//! The hub owns the [`Registry`] and is its only mutator. Deliveries
//! serialize once, snapshot the target bucket, then push into each
//! connection's queue without waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{HubConfig, SlowConsumerPolicy};
use crate::connection::{ConnectionHandle, Outbox, Payload};
use crate::envelope::{Envelope, Notification, Route};
use crate::error::{EnqueueError, HubError};
use crate::registry::Registry;

/// Outcome of one delivery across every targeted connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    /// Connections the payload was queued on
    pub delivered: usize,
    /// Connections that missed the payload because their queue was full
    pub dropped: usize,
    /// Connections unregistered because their queue was full
    pub evicted: usize,
}

/// Hub-wide counters
#[derive(Debug, Default)]
pub struct HubStats {
    pub registrations: AtomicU64,
    pub unregistrations: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub connections_evicted: AtomicU64,
    pub unroutable: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStatsSnapshot {
    pub registrations: u64,
    pub unregistrations: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub connections_evicted: u64,
    pub unroutable: u64,
}

impl HubStats {
    fn record(&self, report: &DeliveryReport) {
        self.messages_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.messages_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.connections_evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }
}

pub struct Hub {
    registry: Registry,
    config: HubConfig,
    stats: HubStats,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
            stats: HubStats::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Create a new connection sized by this hub's queue capacity.
    /// It receives nothing until [`Hub::register`] is called.
    pub fn connect(
        &self,
        user_id: &str,
        initial_group: Option<String>,
    ) -> (ConnectionHandle, Outbox) {
        ConnectionHandle::new(user_id, initial_group, self.config.queue_capacity)
    }

    /// Index `conn` under its user and, if tagged, its initial group.
    ///
    /// Returns false if `user_id` does not own the connection or the
    /// connection is already closing.
    pub async fn register(&self, user_id: &str, conn: &ConnectionHandle) -> bool {
        if conn.user_id() != user_id {
            warn!(conn_id = %conn.id(), user = %user_id, owner = %conn.user_id(), "Refusing to register connection under another user");
            return false;
        }
        conn.mark_open();
        if !self.registry.add_user(user_id, conn).await {
            debug!(conn_id = %conn.id(), state = %conn.state(), "Connection not indexed");
            return false;
        }
        if let Some(group_id) = conn.initial_group() {
            self.registry.add_group_sub(group_id, conn).await;
        }
        self.stats.registrations.fetch_add(1, Ordering::Relaxed);
        info!(
            conn_id = %conn.id(),
            user = %user_id,
            group = conn.initial_group().unwrap_or(""),
            "Connection registered"
        );
        true
    }

    /// Remove `conn` from every index and close its outbound queue.
    ///
    /// Idempotent: only the first call does any work and returns true. The
    /// connection's own owner is used for the user index, so a mismatched
    /// `user_id` cannot leave it behind.
    pub async fn unregister(&self, user_id: &str, conn: &ConnectionHandle) -> bool {
        if !conn.begin_closing() {
            return false;
        }
        if conn.user_id() != user_id {
            warn!(conn_id = %conn.id(), user = %user_id, owner = %conn.user_id(), "Unregister called with wrong user, using owner");
        }
        let purged = self.registry.purge(conn.user_id(), conn).await;
        conn.close_outbound();
        self.stats.unregistrations.fetch_add(1, Ordering::Relaxed);
        info!(
            conn_id = %conn.id(),
            user = %conn.user_id(),
            groups = purged.groups.len(),
            "Connection unregistered"
        );
        true
    }

    /// Subscribe an open connection to `group_id`. Returns false if it was
    /// already subscribed or is not open.
    pub async fn subscribe_to_group(&self, group_id: &str, conn: &ConnectionHandle) -> bool {
        if group_id.is_empty() || !conn.is_open() {
            return false;
        }
        let added = self.registry.add_group_sub(group_id, conn).await;
        if added {
            debug!(conn_id = %conn.id(), group = %group_id, "Subscribed to group");
        }
        added
    }

    pub async fn deliver_to_user(
        &self,
        user_id: &str,
        envelope: &Envelope,
    ) -> Result<DeliveryReport, HubError> {
        let payload: Payload = Arc::from(envelope.to_json()?);
        Ok(self.deliver_raw_to_user(user_id, payload).await)
    }

    pub async fn deliver_to_group(
        &self,
        group_id: &str,
        envelope: &Envelope,
    ) -> Result<DeliveryReport, HubError> {
        let payload: Payload = Arc::from(envelope.to_json()?);
        Ok(self.deliver_raw_to_group(group_id, payload).await)
    }

    /// Push an already-serialized payload to every connection of `user_id`.
    pub async fn deliver_raw_to_user(&self, user_id: &str, payload: Payload) -> DeliveryReport {
        let targets = self.registry.snapshot_user(user_id).await;
        let report = self.fan_out(targets, payload).await;
        debug!(user = %user_id, delivered = report.delivered, dropped = report.dropped, evicted = report.evicted, "Delivered to user");
        report
    }

    /// Push an already-serialized payload to every subscriber of `group_id`.
    pub async fn deliver_raw_to_group(&self, group_id: &str, payload: Payload) -> DeliveryReport {
        let targets = self.registry.snapshot_group(group_id).await;
        let report = self.fan_out(targets, payload).await;
        debug!(group = %group_id, delivered = report.delivered, dropped = report.dropped, evicted = report.evicted, "Delivered to group");
        report
    }

    /// Route by addressing mode: recipient first, then group.
    pub async fn send_message(&self, envelope: &Envelope) -> Result<DeliveryReport, HubError> {
        let route = envelope.route().inspect_err(|e| {
            self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
            warn!(kind = envelope.kind(), "Dropping envelope: {}", e);
        })?;
        match route {
            Route::User(user_id) => self.deliver_to_user(&user_id, envelope).await,
            Route::Group(group_id) => self.deliver_to_group(&group_id, envelope).await,
        }
    }

    pub async fn send_notification(
        &self,
        notification: &Notification,
    ) -> Result<DeliveryReport, HubError> {
        self.send_message(&Envelope::Notification(notification.clone()))
            .await
    }

    async fn fan_out(&self, targets: Vec<ConnectionHandle>, payload: Payload) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut stalled = Vec::new();

        for conn in targets {
            match conn.try_enqueue(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Closed) => {}
                Err(EnqueueError::Full) => match self.config.slow_consumer {
                    SlowConsumerPolicy::Drop => {
                        debug!(conn_id = %conn.id(), "Outbound queue full, dropping payload");
                        report.dropped += 1;
                    }
                    SlowConsumerPolicy::Evict => stalled.push(conn),
                },
            }
        }

        for conn in stalled {
            warn!(conn_id = %conn.id(), user = %conn.user_id(), "Outbound queue full, evicting slow consumer");
            if self.unregister(conn.user_id(), &conn).await {
                report.evicted += 1;
            }
        }

        self.stats.record(&report);
        report
    }
}
