//! Error types for status-relay.

use thiserror::Error;

/// Main error type for status-relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Proposed session identity is not a valid name.
    #[error("invalid session identity: {0}")]
    InvalidIdentity(String),

    /// Session with the given identity was not found in the store.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session with the given identity already exists.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// Identity was deleted earlier in this process and cannot be reused.
    #[error("session identity retired: {0}")]
    SessionRetired(String),

    /// Ledger position outside `1..=len`.
    #[error("position {position} out of range (ledger has {len} entries)")]
    OutOfRange { position: usize, len: usize },

    /// Invalid worker state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::session::WorkerState,
        to: crate::session::WorkerState,
    },

    /// Credentials rejected or revoked by the remote service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Transient connection failure.
    #[error("network error: {0}")]
    Network(String),

    /// Device pairing handshake failed.
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// Outbound message could not be sent.
    #[error("send failed: {0}")]
    Send(String),

    /// Previously sent message could not be revoked.
    #[error("revoke failed: {0}")]
    Revoke(String),

    /// Durable store is in an unusable state.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ledger or credential encoding error.
    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// Operation was aborted by the operator.
    #[error("operation aborted")]
    Aborted,

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl RelayError {
    /// Whether the failure is transient and worth retrying unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    /// Whether the remote service rejected the stored credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Whether the session's store entry disappeared underneath it.
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }

    /// Whether the error came from durable storage.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Json(_) | Self::Store(_))
    }
}

/// Convenience Result type for status-relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
