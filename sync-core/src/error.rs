//! Error kinds for the synchronization core.
//!
//! Transport/session errors are fatal to the connection, differ/updater
//! errors are scoped to one entity and recoverable, and a hash mismatch
//! is a hard failure because the replicas are no longer provably
//! consistent.

use thiserror::Error;

/// Errors surfaced by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed header, unknown message type, or JSON parse failure.
    /// Fatal to the session.
    #[error("bad frame: {0}")]
    BadFrame(String),

    /// The listener could not bind to any port in its search range.
    #[error("bind failed on {host}:{port}: {source}")]
    BindFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The connector exhausted `max_port_search_range` without connecting.
    #[error("connect exhausted: tried {host}:{base_port}..{host}:{last_port}")]
    ConnectExhausted {
        host: String,
        base_port: u16,
        last_port: u16,
    },

    /// A back-end adapter call failed for a single entity. The containing
    /// scan/update step skips that entity but continues; this variant
    /// never drops the connection.
    #[error("adapter failure for {entity_kiid}: {reason}")]
    AdapterFailure { entity_kiid: String, reason: String },

    /// After applying a `REP`, the local `BoardModel::hash_board()` does
    /// not match the hash carried in the reply. The replicas have
    /// diverged; the session must be disconnected.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Underlying socket I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error on a message payload.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SyncError {
    /// True for errors that should terminate the session (transport/session
    /// class errors), false for errors scoped to a single entity.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::AdapterFailure { .. })
    }
}
