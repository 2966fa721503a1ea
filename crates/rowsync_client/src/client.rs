//! The sync client: upload coordination and offline-mode lifecycle.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rowsync_protocol::{
    ordered_translations, pk_of, ChangeSet, CleanRequest, DeletesRequest, Ref, Row, SessionStatus,
    Timestamp, TranslationMap, UniqueConflicts, UploadRequest,
};
use rowsync_store::{with_transaction, Storage, SyncInfoStore, Where};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::download;
use crate::error::{SyncError, SyncResult};
use crate::extract::extract_changes;
use crate::session::{ClientSession, UploadMarker};
use crate::transport::SyncTransport;
use crate::wake::{NoopWakeLock, WakeGuard, WakeLockProvider};

/// What one `sync()` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Session timestamp issued by the oracle.
    pub sync_timestamp: Timestamp,
    /// Number of local changes uploaded.
    pub uploaded: usize,
    /// Number of remote deletes applied locally.
    pub deletes_applied: usize,
    /// Number of remote rows applied locally.
    pub downloaded: usize,
    /// True when crash recovery had to wipe and re-download.
    pub recovered_by_wipe: bool,
}

/// An offline-first sync client over injected dependencies.
///
/// One value per local database; [`SyncClient::sync`] runs the whole
/// upload/download cycle strictly sequentially and refuses to overlap
/// with itself.
pub struct SyncClient<T: SyncTransport> {
    store: Arc<dyn Storage>,
    infos: SyncInfoStore,
    session: ClientSession,
    transport: T,
    wake: Arc<dyn WakeLockProvider>,
    config: SyncConfig,
    syncing: AtomicBool,
}

impl<T: SyncTransport> SyncClient<T> {
    /// Creates a client over a storage backend and a transport.
    pub fn new(store: Arc<dyn Storage>, transport: T) -> Self {
        Self {
            infos: SyncInfoStore::new(store.clone()),
            session: ClientSession::new(store.clone()),
            store,
            transport,
            wake: Arc::new(NoopWakeLock),
            config: SyncConfig::default(),
            syncing: AtomicBool::new(false),
        }
    }

    /// Sets the sync configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the wake-lock provider.
    pub fn with_wake_lock(mut self, wake: Arc<dyn WakeLockProvider>) -> Self {
        self.wake = wake;
        self
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// The shadow-record store, for tracked application writes.
    pub fn sync_infos(&self) -> &SyncInfoStore {
        &self.infos
    }

    /// The transport, mostly useful for tests.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Enters offline mode as `user`. Fails while another user's
    /// unsynced offline data is still on the device.
    pub fn start_offline_mode(&self, user: &str) -> SyncResult<()> {
        if let Some(existing) = self.session.offline_user()? {
            if existing != user && self.infos.has_pending()? {
                return Err(SyncError::OfflineDataPending { user: existing });
            }
        }
        info!(user, "entering offline mode");
        self.session.set_offline_user(user)?;
        Ok(())
    }

    /// Leaves offline mode. Fails while unsynced changes remain, so
    /// data is only ever discarded through [`Self::delete_offline_data`].
    pub fn end_offline_mode(&self) -> SyncResult<()> {
        if self.infos.has_pending()? {
            let user = self.session.offline_user()?.unwrap_or_default();
            return Err(SyncError::OfflineDataPending { user });
        }
        self.session.clear_offline_user()?;
        Ok(())
    }

    /// The user offline mode was entered with, if any.
    pub fn offline_user(&self) -> SyncResult<Option<String>> {
        Ok(self.session.offline_user()?)
    }

    /// True when any local row still awaits upload.
    pub fn has_offline_rows(&self) -> SyncResult<bool> {
        Ok(self.infos.has_pending()?)
    }

    /// Explicitly discards all local synchronized data, shadows and
    /// session state. The only intentional data-loss path.
    pub fn delete_offline_data(&self) -> SyncResult<()> {
        warn!("discarding all offline data");
        self.wipe_local_data()?;
        self.session.clear_upload_marker()?;
        self.session.clear_offline_user()?;
        Ok(())
    }

    /// Runs one full sync cycle: crash recovery, timestamp, remote
    /// deletes, upload + status poll + reconciliation, remote changes,
    /// cleanup. All local mutation happens in one transaction.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadySyncing);
        }
        let result = self.sync_inner();
        self.syncing.store(false, Ordering::SeqCst);
        result
    }

    fn sync_inner(&self) -> SyncResult<SyncOutcome> {
        let _wake = WakeGuard::hold(self.wake.clone());

        let recovered_by_wipe = self.recover_from_crash()?;

        let sync_timestamp = self.transport.fetch_timestamp()?.sync_timestamp;
        info!(sync_timestamp, "sync started");
        self.session.set_upload_marker(&UploadMarker {
            sync_timestamp,
            sync_dir: None,
        })?;

        self.store.begin()?;
        self.store.set_referential_integrity(false)?;

        let mut accepted_dir: Option<String> = None;
        match self.sync_steps(sync_timestamp, &mut accepted_dir) {
            Ok(mut outcome) => {
                outcome.recovered_by_wipe = recovered_by_wipe;
                self.store.set_referential_integrity(true)?;
                self.store.commit()?;
                self.session.clear_upload_marker()?;
                if let Some(dir) = accepted_dir {
                    self.clean_session_dir(&dir);
                }
                info!(
                    sync_timestamp,
                    uploaded = outcome.uploaded,
                    downloaded = outcome.downloaded,
                    "sync finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                // Roll everything back but keep the upload marker so the
                // next attempt can resolve the session server-side.
                let _ = self.store.rollback();
                let _ = self.store.set_referential_integrity(true);
                if let Some(dir) = accepted_dir {
                    let _ = self.session.set_upload_marker(&UploadMarker {
                        sync_timestamp,
                        sync_dir: Some(dir),
                    });
                }
                warn!(sync_timestamp, error = %err, "sync failed, local state rolled back");
                Err(err)
            }
        }
    }

    fn sync_steps(
        &self,
        sync_timestamp: Timestamp,
        accepted_dir: &mut Option<String>,
    ) -> SyncResult<SyncOutcome> {
        // deletes phase
        let marks = download::watermarks(self.store.as_ref(), &self.infos)?;
        let deletes = self.transport.fetch_deletes(&DeletesRequest {
            sync_timestamp,
            sync_infos: marks,
        })?;
        let deletes_applied =
            download::apply_deletes(self.store.as_ref(), &self.infos, &deletes, sync_timestamp)?;

        // upload phase
        let changes = extract_changes(self.store.as_ref(), &self.infos)?;
        let mut uploaded = 0;
        if !changes.is_empty() {
            uploaded = changes.values().map(|t| t.len()).sum();
            let response = self.transport.upload_changes(&UploadRequest {
                changes: changes.clone(),
                sync_timestamp,
            })?;
            *accepted_dir = Some(response.sync_dir.clone());
            self.session.set_upload_marker(&UploadMarker {
                sync_timestamp,
                sync_dir: Some(response.sync_dir.clone()),
            })?;

            let status = self.poll_status(&response.sync_dir)?;
            if let Some(session_error) = status.error {
                return Err(SyncError::MergeFailed(session_error.message));
            }
            self.apply_upload_results(sync_timestamp, &changes, status)?;
        }

        // changes phase
        let downloaded = download::run_changes_loop(
            self.store.as_ref(),
            &self.infos,
            &self.transport,
            sync_timestamp,
            self.config.changes_loop_cap,
        )?;

        Ok(SyncOutcome {
            sync_timestamp,
            uploaded,
            deletes_applied,
            downloaded,
            recovered_by_wipe: false,
        })
    }

    /// Resolves a session left behind by a crash. Returns true when the
    /// only way out was a full wipe-and-resync.
    fn recover_from_crash(&self) -> SyncResult<bool> {
        let Some(marker) = self.session.upload_marker()? else {
            return Ok(false);
        };
        warn!(
            sync_timestamp = marker.sync_timestamp,
            "found an unreconciled session from a previous run"
        );
        let Some(dir) = &marker.sync_dir else {
            // Crash before the server accepted anything; nothing was
            // merged, the pending changes will simply go out again.
            self.session.clear_upload_marker()?;
            return Ok(false);
        };
        match self.transport.fetch_status(dir) {
            Ok(status) if status.finished => {
                // Server resolved the session one way or the other: on
                // success re-uploads turn into unique-conflict
                // translations, on error nothing was committed.
                debug!(dir, "previous session finished server-side, proceeding");
                self.session.clear_upload_marker()?;
                self.clean_session_dir(dir);
                Ok(false)
            }
            _ => {
                warn!(dir, "previous session unresolvable, wiping local data for resync");
                self.wipe_local_data()?;
                self.session.clear_upload_marker()?;
                Ok(true)
            }
        }
    }

    fn wipe_local_data(&self) -> SyncResult<()> {
        let tables: Vec<String> = self
            .store
            .schema()
            .synced_tables()
            .map(|t| t.name.clone())
            .collect();
        self.store.set_referential_integrity(false)?;
        // All-or-nothing: a failure mid-wipe must not leave a half-empty
        // database behind.
        let result = with_transaction(self.store.as_ref(), || {
            for table in &tables {
                self.store.delete_where(table, &Where::all())?;
            }
            self.infos.clear()?;
            Ok(())
        });
        self.store.set_referential_integrity(true)?;
        result
    }

    fn poll_status(&self, dir: &str) -> SyncResult<SessionStatus> {
        let poll = &self.config.poll;
        let start = Instant::now();
        for attempt in 0..poll.max_attempts {
            let delay = poll.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if let Some(deadline) = poll.deadline {
                if start.elapsed() > deadline {
                    break;
                }
            }
            let status = self.transport.fetch_status(dir)?;
            if status.finished {
                return Ok(status);
            }
            debug!(dir, attempt, "upload still processing");
        }
        Err(SyncError::PollTimeout)
    }

    /// Applies the session artifacts: canonical conflict rows replace
    /// local ones, translated refs are rewritten (largest new ref
    /// first) along with every FK column referencing the table, and
    /// the uploaded rows' shadows are stamped with the session
    /// timestamp.
    fn apply_upload_results(
        &self,
        sync_timestamp: Timestamp,
        changes: &ChangeSet,
        status: SessionStatus,
    ) -> SyncResult<()> {
        let translations: TranslationMap = status.translated_ids.unwrap_or_default();
        let conflicts: UniqueConflicts = status.unique_conflicts.unwrap_or_default();

        self.apply_unique_conflicts(sync_timestamp, &translations, &conflicts)?;
        self.apply_translations(&translations, &conflicts)?;

        for (table, table_changes) in changes {
            let Some(t) = self.store.schema().table(table) else {
                continue;
            };
            let map = translations.get(table);
            let mut live_refs = Vec::new();
            for row in table_changes.inserts.iter().chain(&table_changes.updates) {
                if let Some(old) = pk_of(row, &t.pk_name) {
                    let new = map.and_then(|m| m.get(&old).copied()).unwrap_or(old);
                    live_refs.push(new);
                }
            }
            self.infos
                .mark_synced(table, &live_refs, sync_timestamp, false)?;

            // Confirmed deletes keep a clean tombstone; refs the guard
            // excluded come back through the changes phase as pending.
            let dead_refs: Vec<Ref> = table_changes.deletes.iter().map(|d| d.ref_).collect();
            self.infos
                .mark_synced(table, &dead_refs, sync_timestamp, true)?;
        }
        Ok(())
    }

    fn apply_unique_conflicts(
        &self,
        sync_timestamp: Timestamp,
        translations: &TranslationMap,
        conflicts: &UniqueConflicts,
    ) -> SyncResult<()> {
        for (table, rows) in conflicts {
            let Some(t) = self.store.schema().table(table) else {
                warn!(table = %table, "unique conflicts for an unknown table");
                continue;
            };
            let pk_name = t.pk_name.clone();
            for canonical in rows {
                let Some(new_ref) = pk_of(canonical, &pk_name) else {
                    continue;
                };
                // The local row that collided still keys off its old
                // ref; find it through the translation pair.
                let old_ref = translations.get(table).and_then(|map| {
                    map.iter()
                        .find(|(_, new)| **new == new_ref)
                        .map(|(old, _)| *old)
                });
                if let Some(old_ref) = old_ref {
                    self.store
                        .delete_where(table, &Where::all().eq(pk_name.as_str(), old_ref))?;
                    self.infos.remove(table, old_ref)?;
                }
                debug!(table = %table, row_ref = new_ref, "replacing local row with canonical server row");
                self.store.upsert(table, canonical.clone())?;
                self.infos.mark_synced(table, &[new_ref], sync_timestamp, false)?;
            }
        }
        Ok(())
    }

    fn apply_translations(
        &self,
        translations: &TranslationMap,
        conflicts: &UniqueConflicts,
    ) -> SyncResult<()> {
        for (table, map) in translations {
            let Some(t) = self.store.schema().table(table) else {
                warn!(table = %table, "translations for an unknown table");
                continue;
            };
            let pk_name = t.pk_name.clone();
            let conflict_refs: BTreeSet<Ref> = conflicts
                .get(table)
                .map(|rows| rows.iter().filter_map(|r| pk_of(r, &pk_name)).collect())
                .unwrap_or_default();

            // Largest new ref first, so rewrites never collide with a
            // pair not yet processed.
            for (old_ref, new_ref) in ordered_translations(map) {
                if !conflict_refs.contains(&new_ref) {
                    let mut values = Row::new();
                    values.insert(pk_name.clone(), Value::from(new_ref));
                    self.store
                        .update(table, &Where::all().eq(pk_name.as_str(), old_ref), values)?;
                    self.infos.retarget_ref(table, old_ref, new_ref)?;
                }
                // FK columns referencing this table follow in any case.
                let referencing: Vec<(String, String)> = self
                    .store
                    .schema()
                    .referencing_fields(table)
                    .iter()
                    .map(|(src, field)| (src.name.clone(), field.name.clone()))
                    .collect();
                for (src_table, column) in referencing {
                    let mut values = Row::new();
                    values.insert(column.clone(), Value::from(new_ref));
                    self.store.update(
                        &src_table,
                        &Where::all().eq(column.as_str(), old_ref),
                        values,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn clean_session_dir(&self, dir: &str) {
        if let Err(err) = self.transport.clean_sync_dir(&CleanRequest {
            dir_name: dir.to_string(),
        }) {
            // Best-effort: stale session directories are harmless.
            warn!(dir, error = %err, "failed to clean session directory");
        }
    }
}
