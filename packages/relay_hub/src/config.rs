use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// What the hub does when a connection's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowConsumerPolicy {
    /// Drop the single payload for that connection and keep it registered.
    Drop,
    /// Treat the connection as dead and unregister it.
    #[default]
    Evict,
}

/// Runtime tuning for the hub and its connection pumps.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue
    pub queue_capacity: usize,
    /// Largest inbound text frame accepted from a peer, in bytes
    pub max_message_size: usize,
    /// Liveness window: a connection with no inbound traffic for this long is dead
    pub pong_wait: Duration,
    /// Interval between keepalive pings; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Upper bound on a single transport write
    pub write_wait: Duration,
    /// Maximum number of queued payloads folded into one outbound frame
    pub max_coalesce: usize,
    pub slow_consumer: SlowConsumerPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

/// Ceiling for every keepalive duration; deadlines are computed as
/// `Instant::now() + duration` and must not overflow.
pub const MAX_KEEPALIVE: Duration = Duration::from_secs(24 * 60 * 60);

/// Floor for the transport-level frame cap.
const MIN_TRANSPORT_LIMIT: usize = 64 * 1024;

impl HubConfig {
    /// Default config with the ping period derived as 9/10 of `pong_wait`.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            queue_capacity: 256,
            max_message_size: 512,
            pong_wait,
            ping_period: pong_wait / 10 * 9,
            write_wait: Duration::from_secs(10),
            max_coalesce: 256,
            slow_consumer: SlowConsumerPolicy::default(),
        }
    }

    /// Hard cap for the websocket transport. Frames between `max_message_size`
    /// and this limit reach the pump and are dropped there; anything larger
    /// fails the read and closes the connection.
    pub fn transport_limit(&self) -> usize {
        self.max_message_size.saturating_mul(16).max(MIN_TRANSPORT_LIMIT)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.queue_capacity == 0 {
            return Err(HubError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("pong_wait", self.pong_wait),
            ("ping_period", self.ping_period),
            ("write_wait", self.write_wait),
        ] {
            if value > MAX_KEEPALIVE {
                return Err(HubError::InvalidConfig(format!(
                    "{name} ({value:?}) exceeds the {MAX_KEEPALIVE:?} ceiling"
                )));
            }
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(HubError::InvalidConfig(format!(
                "ping_period ({:?}) must be non-zero and shorter than pong_wait ({:?})",
                self.ping_period, self.pong_wait
            )));
        }
        if self.write_wait.is_zero() {
            return Err(HubError::InvalidConfig("write_wait must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_keepalive_constants() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.queue_capacity, 256);
        assert_eq!(cfg.max_message_size, 512);
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.slow_consumer, SlowConsumerPolicy::Evict);
        cfg.validate().unwrap();
    }

    #[test]
    fn ping_period_must_be_shorter_than_pong_wait() {
        let cfg = HubConfig {
            ping_period: Duration::from_secs(60),
            ..HubConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(HubError::InvalidConfig(_))));
    }

    #[test]
    fn huge_pong_wait_rejected_without_panicking() {
        let cfg = HubConfig::with_pong_wait(Duration::from_secs(u64::MAX));
        assert!(cfg.ping_period < cfg.pong_wait);
        assert!(matches!(cfg.validate(), Err(HubError::InvalidConfig(_))));

        let cfg = HubConfig::with_pong_wait(MAX_KEEPALIVE);
        cfg.validate().unwrap();
    }

    #[test]
    fn huge_write_wait_rejected() {
        let cfg = HubConfig {
            write_wait: Duration::MAX,
            ..HubConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn transport_limit_leaves_headroom() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.transport_limit(), 64 * 1024);

        let cfg = HubConfig {
            max_message_size: 1024 * 1024,
            ..HubConfig::default()
        };
        assert_eq!(cfg.transport_limit(), 16 * 1024 * 1024);

        let cfg = HubConfig {
            max_message_size: usize::MAX,
            ..HubConfig::default()
        };
        assert_eq!(cfg.transport_limit(), usize::MAX);
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = HubConfig {
            queue_capacity: 0,
            ..HubConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_serde_lowercase() {
        let json = serde_json::to_string(&SlowConsumerPolicy::Drop).unwrap();
        assert_eq!(json, "\"drop\"");
        let back: SlowConsumerPolicy = serde_json::from_str("\"evict\"").unwrap();
        assert_eq!(back, SlowConsumerPolicy::Evict);
    }
}
