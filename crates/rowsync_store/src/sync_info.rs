//! Per-row sync shadow records.
//!
//! Every synced table `t` has a companion `t_sync_info` table holding
//! one [`SyncInfo`] per data row the engine knows about. The shadow is
//! the whole source of truth for change extraction: a row is pending
//! when it has never been stamped (`last_modified` null) or was touched
//! since the last stamp (`modified_local`).

use std::sync::Arc;

use rowsync_protocol::{pk_of, Ref, Row, Timestamp};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::filter::{Cond, Where};
use crate::storage::Storage;

/// One shadow record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncInfo {
    /// Primary key of the data row this record shadows.
    pub ref_: Ref,
    /// Server timestamp of the last synchronized version; `None` for a
    /// row the server has never confirmed.
    pub last_modified: Option<Timestamp>,
    /// Tombstone marker.
    pub deleted: bool,
    /// Set on local writes after the last stamp.
    pub modified_local: bool,
}

impl SyncInfo {
    /// A record for a freshly created local row.
    pub fn new_local(ref_: Ref) -> Self {
        Self {
            ref_,
            last_modified: None,
            deleted: false,
            modified_local: true,
        }
    }

    /// A record stamped by the server at `ts`.
    pub fn synced(ref_: Ref, ts: Timestamp) -> Self {
        Self {
            ref_,
            last_modified: Some(ts),
            deleted: false,
            modified_local: false,
        }
    }

    /// True when this record makes the row part of the next upload.
    pub fn is_pending(&self) -> bool {
        self.last_modified.is_none() || self.modified_local
    }

    /// Encodes the record as a storage row.
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("ref".into(), Value::from(self.ref_));
        row.insert(
            "last_modified".into(),
            self.last_modified.map_or(Value::Null, Value::from),
        );
        row.insert("deleted".into(), Value::from(self.deleted));
        row.insert("modified_local".into(), Value::from(self.modified_local));
        row
    }

    /// Decodes a storage row; fails when the `ref` column is missing.
    pub fn from_row(table: &str, row: &Row) -> StoreResult<Self> {
        let ref_ = pk_of(row, "ref").ok_or_else(|| StoreError::MissingPrimaryKey {
            table: table.into(),
        })?;
        Ok(Self {
            ref_,
            last_modified: row.get("last_modified").and_then(Value::as_i64),
            deleted: row
                .get("deleted")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            modified_local: row
                .get("modified_local")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// The filter selecting pending shadow records.
fn pending_filter() -> Where {
    Where::all().any(vec![
        Cond::is_null("last_modified"),
        Cond::eq("modified_local", true),
    ])
}

/// Shadow-record access over a [`Storage`].
///
/// The tracked write paths (`tracked_insert` and friends) are what an
/// application uses while offline; everything else serves the engine.
#[derive(Clone)]
pub struct SyncInfoStore {
    store: Arc<dyn Storage>,
}

impl SyncInfoStore {
    /// Wraps a storage backend.
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    fn shadow(&self, table: &str) -> StoreResult<String> {
        let t = self
            .store
            .schema()
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        Ok(t.sync_info_table())
    }

    /// The shadow record for one data row.
    pub fn get(&self, table: &str, ref_: Ref) -> StoreResult<Option<SyncInfo>> {
        let shadow = self.shadow(table)?;
        let rows = self.store.select(&shadow, &Where::all().eq("ref", ref_))?;
        rows.first().map(|r| SyncInfo::from_row(&shadow, r)).transpose()
    }

    /// All shadow records of a table.
    pub fn list(&self, table: &str) -> StoreResult<Vec<SyncInfo>> {
        let shadow = self.shadow(table)?;
        self.store
            .select(&shadow, &Where::all())?
            .iter()
            .map(|r| SyncInfo::from_row(&shadow, r))
            .collect()
    }

    /// Shadow records of a table that belong in the next upload.
    pub fn list_pending(&self, table: &str) -> StoreResult<Vec<SyncInfo>> {
        let shadow = self.shadow(table)?;
        self.store
            .select(&shadow, &pending_filter())?
            .iter()
            .map(|r| SyncInfo::from_row(&shadow, r))
            .collect()
    }

    /// True when any synced table has a pending change.
    pub fn has_pending(&self) -> StoreResult<bool> {
        for table in self.store.schema().synced_tables() {
            let n = self
                .store
                .count(&table.sync_info_table(), &pending_filter())?;
            if n > 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Largest server stamp across all shadow tables, or `None` when
    /// nothing was ever synchronized. This seeds the download watermark.
    pub fn max_last_modified(&self) -> StoreResult<Option<Timestamp>> {
        let mut max = None;
        for table in self.store.schema().synced_tables() {
            for row in self
                .store
                .select(&table.sync_info_table(), &Where::all().not_null("last_modified"))?
            {
                let ts = row.get("last_modified").and_then(Value::as_i64);
                if ts > max {
                    max = ts;
                }
            }
        }
        Ok(max)
    }

    /// Inserts a data row and its shadow record; returns the assigned
    /// primary key.
    pub fn tracked_insert(&self, table: &str, row: Row) -> StoreResult<Ref> {
        let shadow = self.shadow(table)?;
        let pk = self.store.insert(table, row)?;
        self.store.insert(&shadow, SyncInfo::new_local(pk).to_row())?;
        Ok(pk)
    }

    /// Updates data rows and flags their shadows as locally modified.
    pub fn tracked_update(&self, table: &str, filter: &Where, values: Row) -> StoreResult<usize> {
        let shadow = self.shadow(table)?;
        let t = self
            .store
            .schema()
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        let refs: Vec<Ref> = self
            .store
            .select(table, filter)?
            .iter()
            .filter_map(|r| pk_of(r, &t.pk_name))
            .collect();
        let n = self.store.update(table, filter, values)?;
        for ref_ in refs {
            let flag: Row = [("modified_local".to_string(), Value::from(true))]
                .into_iter()
                .collect();
            let touched = self
                .store
                .update(&shadow, &Where::all().eq("ref", ref_), flag)?;
            if touched == 0 {
                // The row predates tracking; start shadowing it now.
                self.store.insert(&shadow, SyncInfo::new_local(ref_).to_row())?;
            }
        }
        Ok(n)
    }

    /// Deletes data rows, leaving tombstones for rows the server has
    /// already confirmed. Never-synced rows vanish without a trace.
    pub fn tracked_delete(&self, table: &str, filter: &Where) -> StoreResult<usize> {
        let shadow = self.shadow(table)?;
        let t = self
            .store
            .schema()
            .table(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        let refs: Vec<Ref> = self
            .store
            .select(table, filter)?
            .iter()
            .filter_map(|r| pk_of(r, &t.pk_name))
            .collect();
        let n = self.store.delete_where(table, filter)?;
        for ref_ in refs {
            let by_ref = Where::all().eq("ref", ref_);
            match self.get(table, ref_)? {
                Some(info) if info.last_modified.is_some() => {
                    let values: Row = [
                        ("deleted".to_string(), Value::from(true)),
                        ("modified_local".to_string(), Value::from(true)),
                    ]
                    .into_iter()
                    .collect();
                    self.store.update(&shadow, &by_ref, values)?;
                }
                _ => {
                    self.store.delete_where(&shadow, &by_ref)?;
                }
            }
        }
        Ok(n)
    }

    /// Replaces the shadow records of `refs` with clean records stamped
    /// at `ts`. Tombstones stay tombstones when `deleted` is set.
    pub fn mark_synced(
        &self,
        table: &str,
        refs: &[Ref],
        ts: Timestamp,
        deleted: bool,
    ) -> StoreResult<()> {
        let shadow = self.shadow(table)?;
        for ref_ in refs {
            self.store
                .delete_where(&shadow, &Where::all().eq("ref", *ref_))?;
            let info = SyncInfo {
                ref_: *ref_,
                last_modified: Some(ts),
                deleted,
                modified_local: false,
            };
            self.store.insert(&shadow, info.to_row())?;
        }
        Ok(())
    }

    /// Writes a shadow record verbatim, replacing any existing one.
    pub fn upsert(&self, table: &str, info: SyncInfo) -> StoreResult<()> {
        let shadow = self.shadow(table)?;
        self.store.upsert(&shadow, info.to_row())
    }

    /// Sets values on one shadow record.
    pub fn set_fields(&self, table: &str, ref_: Ref, values: Row) -> StoreResult<usize> {
        let shadow = self.shadow(table)?;
        self.store
            .update(&shadow, &Where::all().eq("ref", ref_), values)
    }

    /// Moves a live shadow record from `old` to `new` after the server
    /// assigned a permanent key. Tombstoned records keep the old key so
    /// the delete still names the row the server last saw.
    pub fn retarget_ref(&self, table: &str, old: Ref, new: Ref) -> StoreResult<usize> {
        let shadow = self.shadow(table)?;
        let filter = Where::all().eq("ref", old).eq("deleted", false);
        let values: Row = [("ref".to_string(), Value::from(new))].into_iter().collect();
        self.store.update(&shadow, &filter, values)
    }

    /// Removes one shadow record.
    pub fn remove(&self, table: &str, ref_: Ref) -> StoreResult<usize> {
        let shadow = self.shadow(table)?;
        self.store.delete_where(&shadow, &Where::all().eq("ref", ref_))
    }

    /// Drops every shadow record of every synced table.
    pub fn clear(&self) -> StoreResult<()> {
        let tables: Vec<String> = self
            .store
            .schema()
            .synced_tables()
            .map(|t| t.sync_info_table())
            .collect();
        for shadow in tables {
            self.store.delete_where(&shadow, &Where::all())?;
        }
        Ok(())
    }
}
