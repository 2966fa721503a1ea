//! The delete-conflict guard.
//!
//! An incoming delete must never destroy data the server has not seen
//! synced, and never orphan rows that other unsynced data still points
//! at. Conflicting refs get the "reappear" treatment: their shadow is
//! turned back into a pending insert so the row flows to every client
//! on the next download, and the ref is dropped from the delete batch.

use rowsync_protocol::{pk_of, DeleteRef, Ref};
use rowsync_store::{Storage, SyncInfo, SyncInfoStore, Where};
use tracing::debug;

use crate::error::ServerResult;

/// Filters a delete batch down to the refs that are safe to remove.
pub fn safe_deletes(
    store: &dyn Storage,
    infos: &SyncInfoStore,
    table: &str,
    batch: &[DeleteRef],
) -> ServerResult<Vec<Ref>> {
    let mut safe = Vec::with_capacity(batch.len());

    'candidates: for del in batch {
        // The server's own record of the row is pending: some other
        // session touched it and never finished reconciling.
        if let Some(info) = infos.get(table, del.ref_)? {
            if info.is_pending() {
                debug!(table, row_ref = del.ref_, "delete hit a pending server row, reappearing");
                reappear(infos, table, del.ref_)?;
                continue;
            }

            // Already tombstoned server-side: a crashed client is
            // re-uploading a delete that went through. Nothing to do.
            if info.deleted {
                debug!(table, row_ref = del.ref_, "delete target already tombstoned");
                continue;
            }

            // Timestamp tie-break: a delete carrying an older version
            // than the server holds lost the conflict; the newer
            // server row survives untouched.
            if let (Some(carried), Some(server)) = (del.last_modified, info.last_modified) {
                if carried < server {
                    debug!(
                        table,
                        row_ref = del.ref_,
                        carried,
                        server,
                        "stale delete dropped by timestamp tie-break"
                    );
                    continue;
                }
            }
        }

        // Unsynced rows elsewhere still reference the candidate.
        for (src, field) in store.schema().referencing_fields(table) {
            let holders = store.select(
                &src.name,
                &Where::all().eq(field.name.as_str(), del.ref_),
            )?;
            for holder in &holders {
                let Some(holder_ref) = pk_of(holder, &src.pk_name) else {
                    continue;
                };
                let pending = match infos.get(&src.name, holder_ref)? {
                    Some(info) => info.is_pending(),
                    // No shadow at all counts as unsynced too.
                    None => true,
                };
                if pending {
                    debug!(
                        table,
                        row_ref = del.ref_,
                        holder = %src.name,
                        "delete target still referenced by unsynced data, reappearing"
                    );
                    reappear(infos, table, del.ref_)?;
                    continue 'candidates;
                }
            }
        }

        safe.push(del.ref_);
    }

    Ok(safe)
}

/// Turns a row's shadow back into a pending insert.
fn reappear(infos: &SyncInfoStore, table: &str, ref_: Ref) -> ServerResult<()> {
    infos.upsert(
        table,
        SyncInfo {
            ref_,
            last_modified: None,
            deleted: false,
            modified_local: true,
        },
    )?;
    Ok(())
}
