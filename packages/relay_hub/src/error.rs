//! Error types for hub routing, envelopes and connection queues.

/// Errors surfaced by the hub's public API.
///
/// Transport failures are only reported by the connection pump and end
/// that connection's loops; they never reach delivery callers.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("envelope has neither a recipient nor a group")]
    Unaddressed,

    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed control message: {0}")]
    MalformedControl(String),

    #[error("incomplete {kind} message: missing {field}")]
    IncompleteControl {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid hub config: {0}")]
    InvalidConfig(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
}

/// Why a payload could not be pushed onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue is full")]
    Full,

    #[error("outbound queue is closed")]
    Closed,
}
