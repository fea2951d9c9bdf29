//! Error types for BNG control-plane operations.

use thiserror::Error;

/// Errors that can occur while ingesting lease events or programming sessions.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or filesystem I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The top-level hook envelope could not be parsed as JSON.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    /// A circuit-id token that is too short or not hex-encoded.
    #[error("malformed circuit-id {0:?}")]
    MalformedCircuitId(String),

    /// A lease address that does not parse as IPv4.
    #[error("malformed lease address {0:?}")]
    MalformedAddress(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The forwarding plane rejected a session mutation.
    #[error("forwarding plane error: {0}")]
    Forwarding(String),

    /// Netlink route programming error.
    #[cfg(feature = "netlink")]
    #[error("netlink error: {0}")]
    Netlink(String),

    /// A spawned task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
