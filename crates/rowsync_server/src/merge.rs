//! The merge engine: applies an uploaded change-set in one transaction.
//!
//! Order per table group: inserts, FK repair, updates, deletes. The
//! order matters because updates and deletes may name refs that only
//! exist after the insert translations. Referential integrity is
//! suspended inside the transaction; client rows arrive holding
//! temporary keys that FK repair resolves.

use std::sync::Arc;

use rowsync_protocol::{
    pk_of, ChangeSet, Ref, Row, Timestamp, TranslationMap, UniqueConflicts,
};
use rowsync_store::{Field, FieldType, Storage, SyncInfo, SyncInfoStore, Table, Where};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};
use crate::guard;

/// Applies uploaded change-sets to the server's storage.
pub struct MergeEngine {
    store: Arc<dyn Storage>,
    infos: SyncInfoStore,
}

impl MergeEngine {
    /// Creates an engine over the server's storage.
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            infos: SyncInfoStore::new(store.clone()),
            store,
        }
    }

    /// Applies one session's change-set. All-or-nothing: any failure
    /// rolls the whole transaction back and nothing is committed.
    pub fn apply(
        &self,
        changes: &ChangeSet,
        sync_timestamp: Timestamp,
    ) -> ServerResult<(TranslationMap, UniqueConflicts)> {
        // Reject unknown tables before touching anything.
        for table in changes.keys() {
            let known = self
                .store
                .schema()
                .table(table)
                .is_some_and(|t| t.synced);
            if !known {
                return Err(ServerError::UnknownTable(table.clone()));
            }
        }

        self.store.begin()?;
        self.store.set_referential_integrity(false)?;
        let result = self.apply_inner(changes, sync_timestamp);
        let restore = self.store.set_referential_integrity(true);
        match result {
            Ok(output) => {
                restore?;
                self.store.commit()?;
                info!(sync_timestamp, tables = changes.len(), "merge committed");
                Ok(output)
            }
            Err(err) => {
                let _ = self.store.rollback();
                Err(err)
            }
        }
    }

    fn apply_inner(
        &self,
        changes: &ChangeSet,
        sync_timestamp: Timestamp,
    ) -> ServerResult<(TranslationMap, UniqueConflicts)> {
        let mut translations = TranslationMap::new();
        let mut conflicts = UniqueConflicts::new();
        // refs to stamp with the session timestamp at the end
        let mut touched: Vec<(String, Vec<Ref>)> = Vec::new();

        // inserts
        for (table_name, table_changes) in changes {
            let table = self.table(table_name)?;
            let mut inserted = Vec::new();
            self.store.set_row_triggers(table_name, false)?;
            let insert_result = (|| -> ServerResult<()> {
                for row in &table_changes.inserts {
                    self.apply_insert(
                        &table,
                        row,
                        &mut translations,
                        &mut conflicts,
                        &mut inserted,
                    )?;
                }
                Ok(())
            })();
            self.store.set_row_triggers(table_name, true)?;
            insert_result?;
            touched.push((table_name.clone(), inserted));
        }

        // FK repair: every table in the batch referencing a translated
        // table gets its referencing column rewritten old -> new.
        for table_name in changes.keys() {
            let table = self.table(table_name)?;
            for fk in table.foreign_keys() {
                let Some(target) = fk.reftable.as_deref() else {
                    continue;
                };
                let Some(pairs) = translations.get(target) else {
                    continue;
                };
                for (old, new) in pairs {
                    let mut values = Row::new();
                    values.insert(fk.name.clone(), Value::from(*new));
                    let n = self.store.update(
                        table_name,
                        &Where::all().eq(fk.name.as_str(), *old),
                        values,
                    )?;
                    if n > 0 {
                        debug!(table = %table_name, column = %fk.name, old, new, rows = n, "repaired foreign keys");
                    }
                }
            }
        }

        // updates
        for (table_name, table_changes) in changes {
            let table = self.table(table_name)?;
            let mut updated = Vec::new();
            for row in &table_changes.updates {
                if let Some(ref_) = self.apply_update(&table, row, &translations)? {
                    updated.push(ref_);
                }
            }
            touched.push((table_name.clone(), updated));
        }

        // deletes
        for (table_name, table_changes) in changes {
            if table_changes.deletes.is_empty() {
                continue;
            }
            let table = self.table(table_name)?;
            let safe = guard::safe_deletes(
                self.store.as_ref(),
                &self.infos,
                table_name,
                &table_changes.deletes,
            )?;
            let expected = safe.len();
            let deleted = self.store.delete_where(
                table_name,
                &Where::all().in_refs(table.pk_name.as_str(), &safe),
            )?;
            if deleted != expected {
                return Err(ServerError::DeleteCountMismatch {
                    table: table_name.clone(),
                    expected,
                    deleted,
                });
            }
            // tombstones so other devices receive the delete
            self.infos
                .mark_synced(table_name, &safe, sync_timestamp, true)?;
        }

        // stamp everything this session inserted or updated
        for (table_name, refs) in touched {
            self.infos
                .mark_synced(&table_name, &refs, sync_timestamp, false)?;
        }

        Ok((translations, conflicts))
    }

    fn apply_insert(
        &self,
        table: &Table,
        row: &Row,
        translations: &mut TranslationMap,
        conflicts: &mut UniqueConflicts,
        inserted: &mut Vec<Ref>,
    ) -> ServerResult<()> {
        let client_ref = pk_of(row, &table.pk_name);
        let cleaned = pick_fields(table, row);

        // An insert naming a key the server already holds is a replay:
        // a reappeared row being re-owned, or a crashed client sending
        // the same session again. Fold it onto the existing row.
        if let Some(existing_ref) = client_ref {
            let held = self
                .store
                .count(
                    &table.name,
                    &Where::all().eq(table.pk_name.as_str(), existing_ref),
                )?
                > 0;
            if held {
                debug!(table = %table.name, row_ref = existing_ref, "insert replayed onto an existing row");
                self.store.update(
                    &table.name,
                    &Where::all().eq(table.pk_name.as_str(), existing_ref),
                    cleaned,
                )?;
                inserted.push(existing_ref);
                return Ok(());
            }
        }

        // unique constraints: an existing match means this insert was
        // already applied (or another device got there first) — resolve
        // as a translation instead of inserting a duplicate
        if let Some(existing) = self.find_unique_match(table, &cleaned)? {
            let Some(existing_ref) = pk_of(&existing, &table.pk_name) else {
                return Err(ServerError::InvalidRequest(format!(
                    "row in '{}' has no primary key",
                    table.name
                )));
            };
            debug!(table = %table.name, existing_ref, "insert resolved as unique conflict");
            if let Some(old) = client_ref {
                translations
                    .entry(table.name.clone())
                    .or_default()
                    .insert(old, existing_ref);
            }
            conflicts
                .entry(table.name.clone())
                .or_default()
                .push(existing);
            // restamp so devices that lost the collision download the
            // canonical row
            inserted.push(existing_ref);
            return Ok(());
        }

        let assigned = self.store.insert(&table.name, cleaned)?;
        // fresh rows stay pending until the final stamping pass, so
        // the delete guard sees them as unsynced within this session
        self.infos
            .upsert(&table.name, SyncInfo::new_local(assigned))?;
        inserted.push(assigned);
        if let Some(old) = client_ref {
            if old != assigned {
                translations
                    .entry(table.name.clone())
                    .or_default()
                    .insert(old, assigned);
            }
        }
        Ok(())
    }

    /// Applies one update row; returns the server-side ref it touched.
    fn apply_update(
        &self,
        table: &Table,
        row: &Row,
        translations: &TranslationMap,
    ) -> ServerResult<Option<Ref>> {
        let Some(client_ref) = pk_of(row, &table.pk_name) else {
            return Err(ServerError::InvalidRequest(format!(
                "update row in '{}' has no primary key",
                table.name
            )));
        };
        let ref_ = translate(translations, &table.name, client_ref);

        let mut values = pick_fields(table, row);
        for fk in table.foreign_keys() {
            let Some(target) = fk.reftable.as_deref() else {
                continue;
            };
            if let Some(v) = values.get(&fk.name).and_then(Value::as_i64) {
                let repaired = translate(translations, target, v);
                if repaired != v {
                    values.insert(fk.name.clone(), Value::from(repaired));
                }
            }
        }

        let n = self.store.update(
            &table.name,
            &Where::all().eq(table.pk_name.as_str(), ref_),
            values,
        )?;
        if n == 0 {
            debug!(table = %table.name, row_ref = ref_, "update for a row the server does not hold");
            return Ok(None);
        }
        Ok(Some(ref_))
    }

    fn find_unique_match(&self, table: &Table, cleaned: &Row) -> ServerResult<Option<Row>> {
        for constraint in &table.unique_constraints {
            let mut filter = Where::all();
            let mut complete = true;
            for column in constraint {
                match cleaned.get(column) {
                    Some(v) => filter = filter.eq(column.as_str(), v.clone()),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            if let Some(existing) = self.store.select(&table.name, &filter)?.into_iter().next() {
                return Ok(Some(existing));
            }
        }
        Ok(None)
    }

    fn table(&self, name: &str) -> ServerResult<Table> {
        self.store
            .schema()
            .table(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownTable(name.to_string()))
    }
}

fn translate(translations: &TranslationMap, table: &str, ref_: Ref) -> Ref {
    translations
        .get(table)
        .and_then(|pairs| pairs.get(&ref_).copied())
        .unwrap_or(ref_)
}

/// Reduces an uploaded row to the schema's writable columns: the
/// primary key and calculated columns are stripped, nulls are dropped,
/// and typed columns are coerced from their wire representation.
fn pick_fields(table: &Table, row: &Row) -> Row {
    let mut cleaned = Row::new();
    for field in &table.fields {
        if field.calculated {
            continue;
        }
        let Some(value) = row.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        cleaned.insert(field.name.clone(), coerce(field, value));
    }
    cleaned
}

/// Brings a wire value into storable shape for its column type.
fn coerce(field: &Field, value: &Value) -> Value {
    match field.ftype {
        FieldType::Date => match value {
            // RFC 3339 text becomes epoch milliseconds
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::from(dt.timestamp_millis()))
                .unwrap_or_else(|_| value.clone()),
            _ => value.clone(),
        },
        FieldType::Json => match value {
            // tolerate double-encoded JSON strings
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}
