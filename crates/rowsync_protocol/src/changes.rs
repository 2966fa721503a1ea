//! Change-set types uploaded by the client.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A primary-key value identifying a domain row.
pub type Ref = i64;

/// Milliseconds since the Unix epoch, as issued by the timestamp oracle.
pub type Timestamp = i64;

/// A domain row on the wire: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Reads the primary-key value of a row under the given column name.
///
/// Returns `None` when the column is absent or not an integer.
pub fn pk_of(row: &Row, pk_name: &str) -> Option<Ref> {
    row.get(pk_name).and_then(|v| v.as_i64())
}

/// A pending delete carried with the timestamp of the last successful
/// sync of that row, used by the server for the timestamp tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRef {
    /// Primary key of the deleted row.
    #[serde(rename = "ref")]
    pub ref_: Ref,
    /// `last_modified` of the row's shadow record at delete time;
    /// `None` for rows that were never synced.
    pub last_modified: Option<Timestamp>,
}

/// A single tracked local edit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// A row created locally and never synced.
    Insert(Row),
    /// A row modified locally after a previous sync.
    Update(Row),
    /// A row deleted locally; only the ref and its version survive.
    Delete(DeleteRef),
}

/// All pending changes of one table, grouped for the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    /// Rows with no prior sync (`last_modified` was null).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserts: Vec<Row>,
    /// Rows modified since their last sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<Row>,
    /// Tombstoned rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<DeleteRef>,
}

impl TableChanges {
    /// Adds a classified change to the appropriate group.
    pub fn push(&mut self, change: RowChange) {
        match change {
            RowChange::Insert(row) => self.inserts.push(row),
            RowChange::Update(row) => self.updates.push(row),
            RowChange::Delete(del) => self.deletes.push(del),
        }
    }

    /// Returns true if no changes are recorded.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of changes across all groups.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// The full upload payload: table name to its pending changes.
///
/// Tables without pending changes are omitted entirely. Built fresh by
/// the change extractor on each sync and discarded after upload.
pub type ChangeSet = BTreeMap<String, TableChanges>;
