//! The six sync operations, expressed over typed messages.

use std::sync::Arc;
use std::thread;

use rowsync_protocol::{
    ChangeSet, CleanRequest, DeleteRef, DeletesRequest, DeletesResponse, LoadChangesRequest,
    LoadChangesResponse, LoadedRow, SessionStatus, TableBatch, TimestampResponse, Timestamp,
    UploadRequest, UploadResponse,
};
use rowsync_store::{Clock, Storage, SyncInfoStore, Where};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::merge::MergeEngine;
use crate::oracle::TimestampOracle;
use crate::session::SessionDir;

/// Serves the sync protocol over a storage backend.
///
/// The handler is cheap to share behind an `Arc`; the merge of an
/// accepted upload runs on a background thread unless the configuration
/// says inline.
pub struct RequestHandler {
    store: Arc<dyn Storage>,
    infos: SyncInfoStore,
    oracle: TimestampOracle,
    config: ServerConfig,
}

impl RequestHandler {
    /// Creates a handler over storage, a clock, and a configuration.
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: ServerConfig) -> Self {
        Self {
            infos: SyncInfoStore::new(store.clone()),
            oracle: TimestampOracle::new(clock),
            store,
            config,
        }
    }

    /// `GET timestamp`: issues the session timestamp.
    pub fn timestamp(&self) -> ServerResult<TimestampResponse> {
        let sync_timestamp = self.oracle.next();
        debug!(sync_timestamp, "issued session timestamp");
        Ok(TimestampResponse { sync_timestamp })
    }

    /// `POST deletes`: tombstones past each table's watermark, bounded
    /// by the session timestamp so later sessions stay invisible.
    pub fn deletes(&self, request: &DeletesRequest) -> ServerResult<DeletesResponse> {
        let mut response = DeletesResponse::default();
        for (table, watermark) in &request.sync_infos {
            if self.synced_table(table).is_none() {
                debug!(table, "deletes requested for a table this server does not sync");
                continue;
            }
            let mut batch = Vec::new();
            for info in self.infos.list(table)? {
                if !info.deleted {
                    continue;
                }
                let Some(ts) = info.last_modified else {
                    continue;
                };
                if ts > request.sync_timestamp {
                    continue;
                }
                if watermark.sync_from.is_some_and(|from| ts <= from) {
                    continue;
                }
                batch.push(DeleteRef {
                    ref_: info.ref_,
                    last_modified: Some(ts),
                });
            }
            if !batch.is_empty() {
                batch.sort_by_key(|d| d.ref_);
                response.deletes.insert(table.clone(), batch);
            }
        }
        Ok(response)
    }

    /// `POST offline_changes`: snapshots the upload into a session
    /// directory, kicks off the merge, and hands back the directory
    /// name to poll.
    pub fn offline_changes(&self, request: &UploadRequest) -> ServerResult<UploadResponse> {
        let dir = SessionDir::create(
            &self.config.sessions_dir,
            request.sync_timestamp,
            &self.config.session_user,
            &request.changes,
        )?;
        let sync_dir = dir.name().to_string();
        info!(
            dir = %sync_dir,
            tables = request.changes.len(),
            "upload accepted"
        );

        if self.config.inline_merge {
            run_merge(
                self.store.clone(),
                &dir,
                &request.changes,
                request.sync_timestamp,
            );
        } else {
            let store = self.store.clone();
            let root = self.config.sessions_dir.clone();
            let name = sync_dir.clone();
            let changes = request.changes.clone();
            let ts = request.sync_timestamp;
            thread::spawn(move || match SessionDir::open(&root, &name) {
                Ok(dir) => run_merge(store, &dir, &changes, ts),
                Err(err) => error!(dir = %name, %err, "session directory vanished before merge"),
            });
        }

        Ok(UploadResponse { sync_dir })
    }

    /// `GET upload_finished`: the session's current status, assembled
    /// from whichever artifacts the merge job has written so far.
    pub fn upload_finished(&self, dir_name: &str) -> ServerResult<SessionStatus> {
        SessionDir::open(&self.config.sessions_dir, dir_name)?.status()
    }

    /// `POST load_changes`: per-table batches of rows stamped inside
    /// the window, paginated by primary key.
    ///
    /// Rows whose shadow carries no stamp are included in every window:
    /// those are rows the delete guard turned back into pending inserts,
    /// and clients must pick them up and own them again.
    pub fn load_changes(&self, request: &LoadChangesRequest) -> ServerResult<LoadChangesResponse> {
        let mut response = LoadChangesResponse::new();
        for (table_name, watermark) in &request.sync_infos {
            let Some(table) = self.synced_table(table_name) else {
                debug!(table = %table_name, "load_changes requested for a table this server does not sync");
                continue;
            };
            let pk_name = table.pk_name.clone();

            let mut due: Vec<_> = self
                .infos
                .list(table_name)?
                .into_iter()
                .filter(|info| {
                    if info.deleted || info.ref_ <= watermark.max_loaded_id {
                        return false;
                    }
                    match info.last_modified {
                        None => true,
                        Some(ts) => {
                            ts <= request.load_until
                                && watermark.sync_from.map_or(true, |from| ts > from)
                        }
                    }
                })
                .collect();
            due.sort_by_key(|info| info.ref_);
            due.truncate(self.config.batch_size);

            let mut batch = TableBatch::default();
            for info in due {
                let rows = self
                    .store
                    .select(table_name, &Where::all().eq(pk_name.as_str(), info.ref_))?;
                let Some(row) = rows.into_iter().next() else {
                    warn!(table = %table_name, row_ref = info.ref_, "shadow record without a data row");
                    continue;
                };
                batch.rows.push(LoadedRow {
                    row,
                    last_modified: info.last_modified,
                });
                batch.max_loaded_id = info.ref_;
            }
            if !batch.rows.is_empty() {
                response.insert(table_name.clone(), batch);
            }
        }
        Ok(response)
    }

    /// `POST clean_sync_dir`: removes a finished session's directory.
    /// Removing one that is already gone succeeds.
    pub fn clean_sync_dir(&self, request: &CleanRequest) -> ServerResult<()> {
        match SessionDir::open(&self.config.sessions_dir, &request.dir_name) {
            Ok(dir) => dir.remove(),
            Err(ServerError::UnknownSession(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn synced_table(&self, name: &str) -> Option<rowsync_store::Table> {
        self.store
            .schema()
            .table(name)
            .filter(|t| t.synced)
            .cloned()
    }
}

/// Runs the merge for one session and records its outcome as the
/// session's result artifacts.
fn run_merge(store: Arc<dyn Storage>, dir: &SessionDir, changes: &ChangeSet, ts: Timestamp) {
    let engine = MergeEngine::new(store);
    match engine.apply(changes, ts) {
        Ok((translations, conflicts)) => {
            if let Err(err) = dir.write_results(&translations, &conflicts) {
                error!(dir = dir.name(), %err, "failed to write session results");
            }
        }
        Err(err) => {
            warn!(dir = dir.name(), %err, "merge failed, session rolled back");
            if let Err(write_err) = dir.write_error(&err.to_string()) {
                error!(dir = dir.name(), %write_err, "failed to write session error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{Row, RowChange, TableChanges, Watermark};
    use rowsync_store::{Field, FieldType, ManualClock, MemoryStorage, Schema, Table};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn schema() -> Schema {
        Schema::new(vec![
            Table::new("tasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_unique(&["title"])
                .synced(),
            Table::new("subtasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_field(Field::new("task_ref", FieldType::Integer).references("tasks"))
                .synced(),
        ])
    }

    fn handler(root: &std::path::Path) -> (Arc<MemoryStorage>, Arc<ManualClock>, RequestHandler) {
        let store = Arc::new(MemoryStorage::new(schema()));
        let clock = Arc::new(ManualClock::new(1_000));
        let handler = RequestHandler::new(
            store.clone(),
            clock.clone(),
            ServerConfig::new(root).with_inline_merge(true),
        );
        (store, clock, handler)
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn upload(handler: &RequestHandler, table: &str, changes: Vec<RowChange>) -> SessionStatus {
        let mut tc = TableChanges::default();
        for c in changes {
            tc.push(c);
        }
        let mut set = ChangeSet::new();
        set.insert(table.into(), tc);

        let ts = handler.timestamp().unwrap().sync_timestamp;
        let accepted = handler
            .offline_changes(&UploadRequest {
                changes: set,
                sync_timestamp: ts,
            })
            .unwrap();
        handler.upload_finished(&accepted.sync_dir).unwrap()
    }

    fn watermarks(sync_from: Option<i64>) -> BTreeMap<String, Watermark> {
        ["tasks", "subtasks"]
            .into_iter()
            .map(|t| {
                (
                    t.to_string(),
                    Watermark {
                        sync_from,
                        max_loaded_id: 0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn upload_then_poll_then_download() {
        let root = tempfile::tempdir().unwrap();
        let (_, _, handler) = handler(root.path());

        let status = upload(
            &handler,
            "tasks",
            vec![RowChange::Insert(row(&[
                ("id", json!(-1)),
                ("title", json!("buy milk")),
            ]))],
        );
        assert!(status.finished);
        assert!(status.error.is_none());
        let assigned = status.translated_ids.unwrap()["tasks"][&-1];

        let loaded = handler
            .load_changes(&LoadChangesRequest {
                sync_infos: watermarks(None),
                load_until: 2_000,
            })
            .unwrap();
        let batch = &loaded["tasks"];
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].row.get("title"), Some(&json!("buy milk")));
        assert_eq!(batch.rows[0].last_modified, Some(1_000));
        assert_eq!(batch.max_loaded_id, assigned);
    }

    #[test]
    fn merge_failure_reported_through_status() {
        let root = tempfile::tempdir().unwrap();
        let (_, _, handler) = handler(root.path());

        let status = upload(
            &handler,
            "tasks",
            vec![RowChange::Delete(DeleteRef {
                ref_: 99,
                last_modified: Some(500),
            })],
        );
        assert!(status.finished);
        let error = status.error.unwrap();
        assert!(error.message.contains("delete count mismatch"));
    }

    #[test]
    fn deletes_served_past_watermark_only() {
        let root = tempfile::tempdir().unwrap();
        let (_, clock, handler) = handler(root.path());

        upload(
            &handler,
            "tasks",
            vec![RowChange::Insert(row(&[
                ("id", json!(-1)),
                ("title", json!("short-lived")),
            ]))],
        );
        clock.set(5_000);
        upload(
            &handler,
            "tasks",
            vec![RowChange::Delete(DeleteRef {
                ref_: 1,
                last_modified: Some(1_000),
            })],
        );

        let ts = handler.timestamp().unwrap().sync_timestamp;
        let fresh = handler
            .deletes(&DeletesRequest {
                sync_timestamp: ts,
                sync_infos: watermarks(None),
            })
            .unwrap();
        assert_eq!(
            fresh.deletes["tasks"],
            vec![DeleteRef {
                ref_: 1,
                last_modified: Some(5_000),
            }]
        );

        // a client already past the tombstone sees nothing
        let caught_up = handler
            .deletes(&DeletesRequest {
                sync_timestamp: ts,
                sync_infos: watermarks(Some(5_000)),
            })
            .unwrap();
        assert!(caught_up.deletes.is_empty());
    }

    #[test]
    fn load_changes_paginates_by_ref() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStorage::new(schema()));
        let clock = Arc::new(ManualClock::new(1_000));
        let handler = RequestHandler::new(
            store,
            clock,
            ServerConfig::new(root.path())
                .with_inline_merge(true)
                .with_batch_size(2),
        );

        let inserts = (1..=5)
            .map(|i| RowChange::Insert(row(&[("title", json!(format!("t{i}")))])))
            .collect();
        upload(&handler, "tasks", inserts);

        let mut sync_infos = watermarks(None);
        let first = handler
            .load_changes(&LoadChangesRequest {
                sync_infos: sync_infos.clone(),
                load_until: 2_000,
            })
            .unwrap();
        assert_eq!(first["tasks"].rows.len(), 2);
        assert_eq!(first["tasks"].max_loaded_id, 2);

        if let Some(w) = sync_infos.get_mut("tasks") {
            w.max_loaded_id = first["tasks"].max_loaded_id;
        }
        let second = handler
            .load_changes(&LoadChangesRequest {
                sync_infos,
                load_until: 2_000,
            })
            .unwrap();
        assert_eq!(second["tasks"].rows.len(), 2);
        assert_eq!(second["tasks"].max_loaded_id, 4);
    }

    #[test]
    fn guarded_delete_reappears_through_load_changes() {
        let root = tempfile::tempdir().unwrap();
        let (_, _, handler) = handler(root.path());

        // task arrives and syncs
        let status = upload(
            &handler,
            "tasks",
            vec![RowChange::Insert(row(&[
                ("id", json!(-1)),
                ("title", json!("parent")),
            ]))],
        );
        let task = status.translated_ids.unwrap()["tasks"][&-1];

        // one session uploads both a subtask pointing at the task and a
        // delete of the task: the fresh subtask is unsynced during the
        // delete pass, so the guard keeps the task alive
        let mut set = ChangeSet::new();
        let mut subtasks = TableChanges::default();
        subtasks.push(RowChange::Insert(row(&[
            ("title", json!("child")),
            ("task_ref", json!(task)),
        ])));
        set.insert("subtasks".into(), subtasks);
        let mut tasks = TableChanges::default();
        tasks.push(RowChange::Delete(DeleteRef {
            ref_: task,
            last_modified: Some(1_000),
        }));
        set.insert("tasks".into(), tasks);

        let ts = handler.timestamp().unwrap().sync_timestamp;
        let accepted = handler
            .offline_changes(&UploadRequest {
                changes: set,
                sync_timestamp: ts,
            })
            .unwrap();
        let status = handler.upload_finished(&accepted.sync_dir).unwrap();
        assert!(status.finished);
        assert!(status.error.is_none(), "guard must exclude, not fail");

        // the survivor comes back unstamped, for the client to re-own
        let loaded = handler
            .load_changes(&LoadChangesRequest {
                sync_infos: watermarks(Some(ts)),
                load_until: ts,
            })
            .unwrap();
        let survivor = loaded["tasks"]
            .rows
            .iter()
            .find(|r| r.row.get("id") == Some(&json!(task)))
            .unwrap();
        assert_eq!(survivor.last_modified, None);
    }

    #[test]
    fn clean_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let (_, _, handler) = handler(root.path());

        let ts = handler.timestamp().unwrap().sync_timestamp;
        let accepted = handler
            .offline_changes(&UploadRequest {
                changes: ChangeSet::new(),
                sync_timestamp: ts,
            })
            .unwrap();

        let request = CleanRequest {
            dir_name: accepted.sync_dir.clone(),
        };
        handler.clean_sync_dir(&request).unwrap();
        handler.clean_sync_dir(&request).unwrap();
        assert!(matches!(
            handler.upload_finished(&accepted.sync_dir),
            Err(ServerError::UnknownSession(_))
        ));
    }
}
