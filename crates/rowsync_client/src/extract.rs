//! Change extraction.
//!
//! Reads the shadow tables and builds the [`ChangeSet`] for one upload.
//! Pure read: the shadows are only rewritten after the server confirms
//! the session, so a failed upload extracts the same set again.

use rowsync_protocol::{ChangeSet, DeleteRef, RowChange, TableChanges};
use rowsync_store::{Storage, StoreResult, SyncInfoStore, Where};
use tracing::{debug, warn};

/// Builds the change-set of every pending local row, keyed by table.
/// Tables with nothing pending are omitted.
pub fn extract_changes(store: &dyn Storage, infos: &SyncInfoStore) -> StoreResult<ChangeSet> {
    let mut changes = ChangeSet::new();
    let tables: Vec<_> = store.schema().synced_tables().cloned().collect();
    for table in tables {
        let mut table_changes = TableChanges::default();
        for info in infos.list_pending(&table.name)? {
            if info.deleted {
                table_changes.push(RowChange::Delete(DeleteRef {
                    ref_: info.ref_,
                    last_modified: info.last_modified,
                }));
                continue;
            }
            let filter = Where::all().eq(table.pk_name.as_str(), info.ref_);
            let Some(row) = store.select(&table.name, &filter)?.into_iter().next() else {
                // Shadow without data: the row vanished outside the
                // tracked write paths. Nothing to upload for it.
                warn!(table = %table.name, row_ref = info.ref_, "pending shadow has no data row");
                continue;
            };
            if info.last_modified.is_none() {
                table_changes.push(RowChange::Insert(row));
            } else {
                table_changes.push(RowChange::Update(row));
            }
        }
        if !table_changes.is_empty() {
            debug!(
                table = %table.name,
                inserts = table_changes.inserts.len(),
                updates = table_changes.updates.len(),
                deletes = table_changes.deletes.len(),
                "extracted pending changes"
            );
            changes.insert(table.name.clone(), table_changes);
        }
    }
    Ok(changes)
}
