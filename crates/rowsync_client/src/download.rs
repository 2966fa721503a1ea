//! Download coordination: the deletes phase and the changes phase.
//!
//! Both phases are keyed per table by a watermark. Remote state always
//! overwrites local state, except for rows whose shadow is still
//! pending — those are only ever resolved through the upload phase.

use std::collections::BTreeMap;

use rowsync_protocol::{pk_of, DeletesResponse, LoadChangesRequest, Timestamp, Watermark};
use rowsync_store::{Storage, StoreResult, SyncInfo, SyncInfoStore, Where};
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::transport::SyncTransport;

/// Builds the per-table watermarks for a new download: `sync_from` is
/// the largest `last_modified` the table's shadows carry, and
/// `max_loaded_id` starts at zero for a fresh changes window.
pub fn watermarks(
    store: &dyn Storage,
    infos: &SyncInfoStore,
) -> StoreResult<BTreeMap<String, Watermark>> {
    let mut marks = BTreeMap::new();
    let tables: Vec<String> = store
        .schema()
        .synced_tables()
        .map(|t| t.name.clone())
        .collect();
    for table in tables {
        let sync_from = infos
            .list(&table)?
            .iter()
            .filter_map(|info| info.last_modified)
            .max();
        marks.insert(
            table,
            Watermark {
                sync_from,
                max_loaded_id: 0,
            },
        );
    }
    Ok(marks)
}

/// Applies server-side deletes locally.
///
/// A delete is skipped when the local shadow is itself pending; those
/// rows are resolved through the upload phase (the server applies the
/// same guard on its side). Applied deletes leave a clean tombstone
/// stamped with the deletion timestamp the server carried.
pub fn apply_deletes(
    store: &dyn Storage,
    infos: &SyncInfoStore,
    deletes: &DeletesResponse,
    sync_timestamp: Timestamp,
) -> StoreResult<usize> {
    let mut applied = 0;
    for (table, refs) in &deletes.deletes {
        let Some(t) = store.schema().table(table) else {
            warn!(table = %table, "server sent deletes for an unknown table");
            continue;
        };
        let pk_name = t.pk_name.clone();
        for del in refs {
            match infos.get(table, del.ref_)? {
                Some(info) if info.is_pending() => {
                    debug!(table = %table, row_ref = del.ref_, "skipping remote delete of pending row");
                    continue;
                }
                Some(_) => {}
                // Row was never downloaded here; nothing to remove.
                None => continue,
            }
            store.delete_where(table, &Where::all().eq(pk_name.as_str(), del.ref_))?;
            infos.upsert(
                table,
                SyncInfo {
                    ref_: del.ref_,
                    last_modified: Some(del.last_modified.unwrap_or(sync_timestamp)),
                    deleted: true,
                    modified_local: false,
                },
            )?;
            applied += 1;
        }
    }
    Ok(applied)
}

/// Pulls remote inserts/updates in a bounded loop and applies them.
///
/// Each iteration requests one batch per table past the watermarks;
/// the loop stops when no table returns rows or after `cap` iterations.
/// Returns the number of rows applied.
pub fn run_changes_loop(
    store: &dyn Storage,
    infos: &SyncInfoStore,
    transport: &dyn SyncTransport,
    load_until: Timestamp,
    cap: u32,
) -> SyncResult<usize> {
    let mut marks = watermarks(store, infos)?;
    let mut applied = 0;

    for iteration in 0..cap {
        let response = transport.load_changes(&LoadChangesRequest {
            sync_infos: marks.clone(),
            load_until,
        })?;

        let mut any = false;
        for (table, batch) in &response {
            if batch.rows.is_empty() {
                continue;
            }
            any = true;
            let Some(t) = store.schema().table(table) else {
                warn!(table = %table, "server sent changes for an unknown table");
                continue;
            };
            let pk_name = t.pk_name.clone();
            for loaded in &batch.rows {
                let Some(pk) = pk_of(&loaded.row, &pk_name) else {
                    warn!(table = %table, "downloaded row has no primary key");
                    continue;
                };
                if infos.get(table, pk)?.is_some_and(|info| info.is_pending()) {
                    debug!(table = %table, row_ref = pk, "keeping pending local row over remote state");
                    continue;
                }
                store.upsert(table, loaded.row.clone())?;
                // A row with no server stamp was turned back into a
                // pending insert by the delete guard; record it as
                // pending here too so it goes out with the next upload.
                let shadow = match loaded.last_modified {
                    Some(ts) => SyncInfo::synced(pk, ts),
                    None => SyncInfo::new_local(pk),
                };
                infos.upsert(table, shadow)?;
                applied += 1;
            }
            if let Some(mark) = marks.get_mut(table) {
                mark.max_loaded_id = mark.max_loaded_id.max(batch.max_loaded_id);
            }
        }

        if !any {
            debug!(iterations = iteration + 1, applied, "changes download drained");
            return Ok(applied);
        }
    }

    warn!(cap, "changes download hit the iteration cap");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use rowsync_protocol::{DeleteRef, LoadedRow, Row, TableBatch};
    use rowsync_store::{Field, FieldType, MemoryStorage, Schema, Table};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn fixture() -> (Arc<MemoryStorage>, SyncInfoStore) {
        let store = Arc::new(MemoryStorage::new(Schema::new(vec![Table::new("tasks")
            .with_field(Field::new("title", FieldType::Text))
            .synced()])));
        let infos = SyncInfoStore::new(store.clone());
        (store, infos)
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn watermark_uses_table_max() {
        let (store, infos) = fixture();
        let a = infos
            .tracked_insert("tasks", row(&[("title", json!("a"))]))
            .unwrap();
        let b = infos
            .tracked_insert("tasks", row(&[("title", json!("b"))]))
            .unwrap();
        infos.mark_synced("tasks", &[a], 100, false).unwrap();
        infos.mark_synced("tasks", &[b], 300, false).unwrap();

        let marks = watermarks(store.as_ref(), &infos).unwrap();
        assert_eq!(marks["tasks"].sync_from, Some(300));
        assert_eq!(marks["tasks"].max_loaded_id, 0);
    }

    #[test]
    fn remote_delete_applied_and_tombstoned() {
        let (store, infos) = fixture();
        let pk = infos
            .tracked_insert("tasks", row(&[("title", json!("a"))]))
            .unwrap();
        infos.mark_synced("tasks", &[pk], 100, false).unwrap();

        let mut deletes = DeletesResponse::default();
        deletes.deletes.insert(
            "tasks".into(),
            vec![DeleteRef {
                ref_: pk,
                last_modified: Some(200),
            }],
        );
        let n = apply_deletes(store.as_ref(), &infos, &deletes, 250).unwrap();
        assert_eq!(n, 1);
        assert!(store.select("tasks", &Where::all()).unwrap().is_empty());

        let info = infos.get("tasks", pk).unwrap().unwrap();
        assert!(info.deleted);
        assert!(!info.modified_local);
        assert_eq!(info.last_modified, Some(200));
    }

    #[test]
    fn remote_delete_skips_pending_rows() {
        let (store, infos) = fixture();
        let pk = infos
            .tracked_insert("tasks", row(&[("title", json!("mine"))]))
            .unwrap();

        let mut deletes = DeletesResponse::default();
        deletes.deletes.insert(
            "tasks".into(),
            vec![DeleteRef {
                ref_: pk,
                last_modified: Some(200),
            }],
        );
        let n = apply_deletes(store.as_ref(), &infos, &deletes, 250).unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.select("tasks", &Where::all()).unwrap().len(), 1);
        assert!(infos.get("tasks", pk).unwrap().unwrap().is_pending());
    }

    #[test]
    fn changes_loop_applies_batches_until_empty() {
        let (store, infos) = fixture();
        let transport = MockTransport::new();

        let mut first = rowsync_protocol::LoadChangesResponse::new();
        first.insert(
            "tasks".into(),
            TableBatch {
                rows: vec![LoadedRow {
                    row: row(&[("id", json!(1)), ("title", json!("remote"))]),
                    last_modified: Some(500),
                }],
                max_loaded_id: 1,
            },
        );
        transport.push_batch(first);
        // queue drains to the default empty response afterwards

        let applied =
            run_changes_loop(store.as_ref(), &infos, &transport, 600, 200).unwrap();
        assert_eq!(applied, 1);
        let rows = store.select("tasks", &Where::all()).unwrap();
        assert_eq!(rows[0].get("title"), Some(&json!("remote")));
        let info = infos.get("tasks", 1).unwrap().unwrap();
        assert_eq!(info.last_modified, Some(500));
        assert!(!info.is_pending());
    }

    #[test]
    fn changes_loop_never_overwrites_pending_rows() {
        let (store, infos) = fixture();
        let pk = infos
            .tracked_insert("tasks", row(&[("id", json!(1)), ("title", json!("mine"))]))
            .unwrap();
        assert_eq!(pk, 1);

        let transport = MockTransport::new();
        let mut batch = rowsync_protocol::LoadChangesResponse::new();
        batch.insert(
            "tasks".into(),
            TableBatch {
                rows: vec![LoadedRow {
                    row: row(&[("id", json!(1)), ("title", json!("theirs"))]),
                    last_modified: Some(500),
                }],
                max_loaded_id: 1,
            },
        );
        transport.push_batch(batch);

        run_changes_loop(store.as_ref(), &infos, &transport, 600, 200).unwrap();
        let rows = store.select("tasks", &Where::all()).unwrap();
        assert_eq!(rows[0].get("title"), Some(&json!("mine")));
    }

    #[test]
    fn changes_loop_respects_cap() {
        let (store, infos) = fixture();
        let transport = MockTransport::new();
        // two batches scripted, but the cap stops after one
        for _ in 0..2 {
            let mut batch = rowsync_protocol::LoadChangesResponse::new();
            batch.insert(
                "tasks".into(),
                TableBatch {
                    rows: vec![LoadedRow {
                        row: row(&[("id", json!(7)), ("title", json!("x"))]),
                        last_modified: Some(10),
                    }],
                    max_loaded_id: 7,
                },
            );
            transport.push_batch(batch);
        }

        let applied = run_changes_loop(store.as_ref(), &infos, &transport, 600, 1).unwrap();
        assert_eq!(applied, 1);
    }
}
