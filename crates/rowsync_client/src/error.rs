//! Error types for the sync client.

use rowsync_store::StoreError;
use thiserror::Error;

/// Result type for client sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server finished the session with an error record.
    #[error("server rejected the upload: {0}")]
    MergeFailed(String),

    /// Local storage error during sync.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The status poll exhausted its attempts or deadline.
    #[error("timed out waiting for the server to process the upload")]
    PollTimeout,

    /// A sync is already running on this client.
    #[error("a sync is already in progress")]
    AlreadySyncing,

    /// Another user's unsynced offline data is still on this device.
    #[error("unsynced offline data of user '{user}' exists; sync or discard it first")]
    OfflineDataPending {
        /// The user who owns the pending data.
        user: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the whole sync may succeed. Nothing is
    /// committed locally when a retryable error surfaces.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::PollTimeout => true,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}
