//! Error types for the sync server.

use rowsync_store::StoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving sync requests or merging an
/// uploaded change-set.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The change-set names a table the schema does not know.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The delete batch did not remove exactly the rows it named.
    #[error("delete count mismatch in '{table}': expected {expected}, deleted {deleted}")]
    DeleteCountMismatch {
        /// Table the batch targeted.
        table: String,
        /// Rows the safe subset named.
        expected: usize,
        /// Rows actually removed.
        deleted: usize,
    },

    /// A request could not be understood.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A status or cleanup request named a session that does not exist.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Storage failure.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Session directory I/O failure.
    #[error("session io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON in a request body or session artifact.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    /// True when the fault lies with the request, not the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownTable(_)
                | ServerError::InvalidRequest(_)
                | ServerError::UnknownSession(_)
                | ServerError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ServerError::UnknownTable("nope".into()).is_client_error());
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(!ServerError::DeleteCountMismatch {
            table: "tasks".into(),
            expected: 3,
            deleted: 2,
        }
        .is_client_error());
    }

    #[test]
    fn mismatch_display() {
        let err = ServerError::DeleteCountMismatch {
            table: "tasks".into(),
            expected: 3,
            deleted: 2,
        };
        assert_eq!(
            err.to_string(),
            "delete count mismatch in 'tasks': expected 3, deleted 2"
        );
    }
}
