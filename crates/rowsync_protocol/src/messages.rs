//! Request/response types for the six sync operations.

use crate::changes::{ChangeSet, DeleteRef, Ref, Row, Timestamp};
use crate::translation::{TranslationMap, UniqueConflicts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-table download cursor bounding which remote rows still need to
/// be fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Largest `last_modified` the client already holds for the table,
    /// or `None` for a table never downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_from: Option<Timestamp>,
    /// Largest ref already loaded within the current changes window.
    #[serde(default)]
    pub max_loaded_id: Ref,
}

/// Response of `GET timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampResponse {
    /// The monotonic watermark stamped onto this session.
    pub sync_timestamp: Timestamp,
}

/// Request of `POST deletes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletesRequest {
    /// Session timestamp.
    pub sync_timestamp: Timestamp,
    /// Per-table watermarks.
    pub sync_infos: BTreeMap<String, Watermark>,
}

/// Response of `POST deletes`: server-side tombstones past the watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletesResponse {
    /// Per-table deleted refs with their deletion timestamps.
    pub deletes: BTreeMap<String, Vec<DeleteRef>>,
}

/// Request of `POST offline_changes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// The extracted local change-set.
    pub changes: ChangeSet,
    /// Session timestamp acquired from the oracle.
    pub sync_timestamp: Timestamp,
}

/// Response of `POST offline_changes`: the upload was accepted and
/// processing continues asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Name of the session directory to poll.
    pub sync_dir: String,
}

/// Error record of a failed merge session, as written to `error.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    /// Human-readable failure description.
    pub message: String,
}

/// Response of `GET upload_finished`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// True once the merge job has written its result artifacts.
    pub finished: bool,
    /// Primary-key translations, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_ids: Option<TranslationMap>,
    /// Unique-conflict rows, present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_conflicts: Option<UniqueConflicts>,
    /// Failure record, present when the session was rolled back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
}

impl SessionStatus {
    /// Status of a session still being processed.
    pub fn pending() -> Self {
        Self::default()
    }

    /// Status of a cleanly finished session.
    pub fn finished(translated_ids: TranslationMap, unique_conflicts: UniqueConflicts) -> Self {
        Self {
            finished: true,
            translated_ids: Some(translated_ids),
            unique_conflicts: Some(unique_conflicts),
            error: None,
        }
    }

    /// Status of a failed session.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            finished: true,
            translated_ids: None,
            unique_conflicts: None,
            error: Some(SessionError {
                message: message.into(),
            }),
        }
    }
}

/// Request of `POST load_changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadChangesRequest {
    /// Per-table watermarks.
    pub sync_infos: BTreeMap<String, Watermark>,
    /// Upper timestamp bound: the session timestamp, so rows stamped by
    /// later sessions are left for the next sync.
    pub load_until: Timestamp,
}

/// A downloaded row together with its server-side version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedRow {
    /// The current server row.
    pub row: Row,
    /// Server-side `last_modified` to record in the local shadow.
    /// `None` marks a row the guard turned back into a pending insert;
    /// the client records it as pending and re-uploads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
}

/// One table's batch in a `load_changes` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableBatch {
    /// Rows inserted or updated at/after the watermark.
    pub rows: Vec<LoadedRow>,
    /// New `max_loaded_id` the client should advance its watermark to.
    pub max_loaded_id: Ref,
}

/// Response of `POST load_changes`: per-table batches.
pub type LoadChangesResponse = BTreeMap<String, TableBatch>;

/// Request of `POST clean_sync_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRequest {
    /// Session directory to remove.
    pub dir_name: String,
}
