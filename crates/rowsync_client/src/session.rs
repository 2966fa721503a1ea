//! Persisted client-side session state.
//!
//! Two facts survive a crash: which user entered offline mode, and
//! whether an upload was started and never reconciled. Both live in the
//! storage meta table so they roll back and commit with the data.

use std::sync::Arc;

use rowsync_protocol::Timestamp;
use serde::{Deserialize, Serialize};
use rowsync_store::{Storage, StoreResult};

use crate::error::{SyncError, SyncResult};

const OFFLINE_USER_KEY: &str = "rowsync.offline_user";
const UPLOAD_MARKER_KEY: &str = "rowsync.upload_marker";

/// The persisted "upload started" flag, written before the first local
/// mutation of a sync and cleared only after full reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMarker {
    /// Timestamp the session was started with.
    pub sync_timestamp: Timestamp,
    /// Session directory, known once the server accepted the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_dir: Option<String>,
}

/// Accessor for the persisted session state.
#[derive(Clone)]
pub struct ClientSession {
    store: Arc<dyn Storage>,
}

impl ClientSession {
    /// Wraps a storage backend.
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// The user offline mode was entered with, if any.
    pub fn offline_user(&self) -> StoreResult<Option<String>> {
        self.store.get_meta(OFFLINE_USER_KEY)
    }

    /// Records entering offline mode as `user`.
    pub fn set_offline_user(&self, user: &str) -> StoreResult<()> {
        self.store.set_meta(OFFLINE_USER_KEY, Some(user))
    }

    /// Records leaving offline mode.
    pub fn clear_offline_user(&self) -> StoreResult<()> {
        self.store.set_meta(OFFLINE_USER_KEY, None)
    }

    /// The pending upload marker, if a prior sync never reconciled.
    pub fn upload_marker(&self) -> SyncResult<Option<UploadMarker>> {
        let Some(raw) = self.store.get_meta(UPLOAD_MARKER_KEY)? else {
            return Ok(None);
        };
        let marker = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Protocol(format!("corrupt upload marker: {e}")))?;
        Ok(Some(marker))
    }

    /// Writes the upload marker.
    pub fn set_upload_marker(&self, marker: &UploadMarker) -> SyncResult<()> {
        let raw = serde_json::to_string(marker)
            .map_err(|e| SyncError::Protocol(format!("failed to encode upload marker: {e}")))?;
        self.store.set_meta(UPLOAD_MARKER_KEY, Some(&raw))?;
        Ok(())
    }

    /// Clears the upload marker after reconciliation.
    pub fn clear_upload_marker(&self) -> StoreResult<()> {
        self.store.set_meta(UPLOAD_MARKER_KEY, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_store::{MemoryStorage, Schema};

    fn session() -> ClientSession {
        ClientSession::new(Arc::new(MemoryStorage::new(Schema::new(vec![]))))
    }

    #[test]
    fn offline_user_lifecycle() {
        let session = session();
        assert_eq!(session.offline_user().unwrap(), None);
        session.set_offline_user("alice@example.com").unwrap();
        assert_eq!(
            session.offline_user().unwrap().as_deref(),
            Some("alice@example.com")
        );
        session.clear_offline_user().unwrap();
        assert_eq!(session.offline_user().unwrap(), None);
    }

    #[test]
    fn upload_marker_roundtrip() {
        let session = session();
        assert!(session.upload_marker().unwrap().is_none());

        let marker = UploadMarker {
            sync_timestamp: 1_000,
            sync_dir: None,
        };
        session.set_upload_marker(&marker).unwrap();
        assert_eq!(session.upload_marker().unwrap(), Some(marker));

        let marker = UploadMarker {
            sync_timestamp: 1_000,
            sync_dir: Some("1000_alice".into()),
        };
        session.set_upload_marker(&marker).unwrap();
        assert_eq!(
            session.upload_marker().unwrap().unwrap().sync_dir.as_deref(),
            Some("1000_alice")
        );

        session.clear_upload_marker().unwrap();
        assert!(session.upload_marker().unwrap().is_none());
    }
}
