//! In-memory reference implementation of [`Storage`].
//!
//! Every synced table automatically gets its shadow companion table.
//! Transactions are implemented as a snapshot of the whole state, which
//! is fine at the row counts an offline client carries.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use rowsync_protocol::{pk_of, Ref, Row};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::filter::Where;
use crate::schema::Schema;
use crate::storage::Storage;

type TableData = BTreeMap<Ref, Row>;

#[derive(Default, Clone)]
struct State {
    tables: BTreeMap<String, TableData>,
    meta: BTreeMap<String, String>,
}

struct Inner {
    state: State,
    snapshot: Option<State>,
    ri_enabled: bool,
    disabled_triggers: BTreeSet<String>,
}

/// An in-memory store over a [`Schema`].
pub struct MemoryStorage {
    schema: Schema,
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    /// Creates an empty store. Shadow tables for every synced table are
    /// created alongside the data tables.
    pub fn new(schema: Schema) -> Self {
        let mut tables = BTreeMap::new();
        for table in schema.tables() {
            tables.insert(table.name.clone(), TableData::new());
            if table.synced {
                tables.insert(table.sync_info_table(), TableData::new());
            }
        }
        Self {
            schema,
            inner: RwLock::new(Inner {
                state: State {
                    tables,
                    meta: BTreeMap::new(),
                },
                snapshot: None,
                ri_enabled: true,
                disabled_triggers: BTreeSet::new(),
            }),
        }
    }

    /// Whether any triggers are currently disabled; merges must restore
    /// them before committing.
    pub fn triggers_disabled(&self) -> bool {
        !self.inner.read().disabled_triggers.is_empty()
    }

    /// Primary-key column of `table`, resolving shadow tables to `ref`.
    fn pk_name(&self, table: &str) -> StoreResult<String> {
        if let Some(t) = self.schema.table(table) {
            return Ok(t.pk_name.clone());
        }
        if self.is_shadow(table) {
            return Ok("ref".into());
        }
        Err(StoreError::UnknownTable(table.into()))
    }

    fn is_shadow(&self, table: &str) -> bool {
        self.schema
            .synced_tables()
            .any(|t| t.sync_info_table() == table)
    }

    fn check_foreign_keys(&self, inner: &Inner, table: &str, row: &Row) -> StoreResult<()> {
        if !inner.ri_enabled {
            return Ok(());
        }
        let Some(t) = self.schema.table(table) else {
            return Ok(());
        };
        for fk in t.foreign_keys() {
            let Some(value) = row.get(&fk.name) else {
                continue;
            };
            let Some(pk) = value.as_i64() else {
                continue; // null clears the reference
            };
            let target = fk.reftable.as_deref().unwrap_or_default();
            let present = inner
                .state
                .tables
                .get(target)
                .is_some_and(|rows| rows.contains_key(&pk));
            if !present {
                return Err(StoreError::ForeignKey {
                    table: table.into(),
                    column: fk.name.clone(),
                    target: target.into(),
                    pk,
                });
            }
        }
        Ok(())
    }

    /// Synced rows still referencing `pk` of `table`, by table name.
    fn referenced_by(&self, inner: &Inner, table: &str, pk: Ref) -> Option<(String, String)> {
        for (src, field) in self.schema.referencing_fields(table) {
            let rows = inner.state.tables.get(&src.name)?;
            let held = rows
                .values()
                .any(|r| r.get(&field.name).and_then(Value::as_i64) == Some(pk));
            if held {
                return Some((src.name.clone(), field.name.clone()));
            }
        }
        None
    }
}

impl Storage for MemoryStorage {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn select(&self, table: &str, filter: &Where) -> StoreResult<Vec<Row>> {
        let inner = self.inner.read();
        let rows = inner
            .state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        Ok(rows.values().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn insert(&self, table: &str, mut row: Row) -> StoreResult<Ref> {
        let pk_name = self.pk_name(table)?;
        let mut inner = self.inner.write();
        self.check_foreign_keys(&inner, table, &row)?;
        let rows = inner
            .state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        let pk = match pk_of(&row, &pk_name) {
            Some(pk) => {
                if rows.contains_key(&pk) {
                    return Err(StoreError::Duplicate {
                        table: table.into(),
                        pk,
                    });
                }
                pk
            }
            None => {
                let next = rows.keys().next_back().map_or(1, |max| max + 1);
                row.insert(pk_name, Value::from(next));
                next
            }
        };
        rows.insert(pk, row);
        Ok(pk)
    }

    fn upsert(&self, table: &str, row: Row) -> StoreResult<()> {
        let pk_name = self.pk_name(table)?;
        let pk = pk_of(&row, &pk_name).ok_or_else(|| StoreError::MissingPrimaryKey {
            table: table.into(),
        })?;
        let mut inner = self.inner.write();
        self.check_foreign_keys(&inner, table, &row)?;
        let rows = inner
            .state
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        rows.insert(pk, row);
        Ok(())
    }

    fn update(&self, table: &str, filter: &Where, values: Row) -> StoreResult<usize> {
        let pk_name = self.pk_name(table)?;
        let mut inner = self.inner.write();
        let rows = inner
            .state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;

        let targets: Vec<Ref> = rows
            .iter()
            .filter(|(_, r)| filter.matches(r))
            .map(|(pk, _)| *pk)
            .collect();

        for pk in &targets {
            // Validate the merged row before touching the table, so a
            // failed update leaves the row in place.
            let Some(mut merged) = inner
                .state
                .tables
                .get(table)
                .and_then(|rows| rows.get(pk))
                .cloned()
            else {
                continue;
            };
            for (k, v) in &values {
                merged.insert(k.clone(), v.clone());
            }
            let new_pk = pk_of(&merged, &pk_name).ok_or_else(|| StoreError::MissingPrimaryKey {
                table: table.into(),
            })?;
            if new_pk != *pk
                && inner
                    .state
                    .tables
                    .get(table)
                    .is_some_and(|rows| rows.contains_key(&new_pk))
            {
                return Err(StoreError::Duplicate {
                    table: table.into(),
                    pk: new_pk,
                });
            }
            self.check_foreign_keys(&inner, table, &merged)?;
            if let Some(rows) = inner.state.tables.get_mut(table) {
                rows.remove(pk);
                rows.insert(new_pk, merged);
            }
        }
        Ok(targets.len())
    }

    fn delete_where(&self, table: &str, filter: &Where) -> StoreResult<usize> {
        self.pk_name(table)?;
        let mut inner = self.inner.write();
        let rows = inner
            .state
            .tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.into()))?;
        let targets: Vec<Ref> = rows
            .iter()
            .filter(|(_, r)| filter.matches(r))
            .map(|(pk, _)| *pk)
            .collect();

        if inner.ri_enabled {
            for pk in &targets {
                if let Some((src, column)) = self.referenced_by(&inner, table, *pk) {
                    return Err(StoreError::ForeignKey {
                        table: src,
                        column,
                        target: table.into(),
                        pk: *pk,
                    });
                }
            }
        }

        if let Some(rows) = inner.state.tables.get_mut(table) {
            for pk in &targets {
                rows.remove(pk);
            }
        }
        Ok(targets.len())
    }

    fn begin(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.snapshot.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.snapshot.take().is_none() {
            return Err(StoreError::NoTransaction);
        }
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let snapshot = inner.snapshot.take().ok_or(StoreError::NoTransaction)?;
        inner.state = snapshot;
        Ok(())
    }

    fn set_referential_integrity(&self, enabled: bool) -> StoreResult<()> {
        self.inner.write().ri_enabled = enabled;
        Ok(())
    }

    fn set_row_triggers(&self, table: &str, enabled: bool) -> StoreResult<()> {
        self.pk_name(table)?;
        let mut inner = self.inner.write();
        if enabled {
            inner.disabled_triggers.remove(table);
        } else {
            inner.disabled_triggers.insert(table.into());
        }
        Ok(())
    }

    fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.read().state.meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: Option<&str>) -> StoreResult<()> {
        let mut inner = self.inner.write();
        match value {
            Some(v) => inner.state.meta.insert(key.into(), v.into()),
            None => inner.state.meta.remove(key),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType, Table};
    use serde_json::json;

    fn store() -> MemoryStorage {
        MemoryStorage::new(Schema::new(vec![
            Table::new("tasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_unique(&["title"])
                .synced(),
            Table::new("subtasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_field(Field::new("task_ref", FieldType::Integer).references("tasks"))
                .synced(),
        ]))
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_assigns_keys() {
        let store = store();
        let a = store.insert("tasks", row(&[("title", json!("a"))])).unwrap();
        let b = store.insert("tasks", row(&[("title", json!("b"))])).unwrap();
        assert_eq!((a, b), (1, 2));

        // explicit key, then the counter follows the max
        store
            .insert("tasks", row(&[("id", json!(10)), ("title", json!("c"))]))
            .unwrap();
        let d = store.insert("tasks", row(&[("title", json!("d"))])).unwrap();
        assert_eq!(d, 11);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let store = store();
        store
            .insert("tasks", row(&[("id", json!(1)), ("title", json!("a"))]))
            .unwrap();
        let err = store
            .insert("tasks", row(&[("id", json!(1)), ("title", json!("b"))]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { pk: 1, .. }));
    }

    #[test]
    fn shadow_tables_exist() {
        let store = store();
        store
            .insert(
                "tasks_sync_info",
                row(&[("ref", json!(1)), ("deleted", json!(false))]),
            )
            .unwrap();
        assert_eq!(store.select("tasks_sync_info", &Where::all()).unwrap().len(), 1);
        assert!(matches!(
            store.select("nope_sync_info", &Where::all()),
            Err(StoreError::UnknownTable(_))
        ));
    }

    #[test]
    fn foreign_keys_enforced_and_toggled() {
        let store = store();
        let err = store
            .insert(
                "subtasks",
                row(&[("title", json!("s")), ("task_ref", json!(9))]),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey { .. }));

        store.set_referential_integrity(false).unwrap();
        store
            .insert(
                "subtasks",
                row(&[("title", json!("s")), ("task_ref", json!(9))]),
            )
            .unwrap();
        store
            .insert("tasks", row(&[("id", json!(9)), ("title", json!("t"))]))
            .unwrap();
        store.set_referential_integrity(true).unwrap();

        // deleting a referenced row is blocked
        let err = store
            .delete_where("tasks", &Where::all().eq("id", 9))
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKey { .. }));
    }

    #[test]
    fn update_rekeys_primary_key() {
        let store = store();
        store
            .insert("tasks", row(&[("id", json!(-1)), ("title", json!("a"))]))
            .unwrap();
        let n = store
            .update("tasks", &Where::all().eq("id", -1), row(&[("id", json!(42))]))
            .unwrap();
        assert_eq!(n, 1);
        let rows = store.select("tasks", &Where::all().eq("id", 42)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("title"), Some(&json!("a")));
    }

    #[test]
    fn update_rekey_collision_fails() {
        let store = store();
        store
            .insert("tasks", row(&[("id", json!(1)), ("title", json!("a"))]))
            .unwrap();
        store
            .insert("tasks", row(&[("id", json!(2)), ("title", json!("b"))]))
            .unwrap();
        let err = store
            .update("tasks", &Where::all().eq("id", 1), row(&[("id", json!(2))]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { pk: 2, .. }));
        // original row untouched
        assert_eq!(store.select("tasks", &Where::all().eq("id", 1)).unwrap().len(), 1);
    }

    #[test]
    fn transaction_rollback_restores_state() {
        let store = store();
        store.insert("tasks", row(&[("title", json!("kept"))])).unwrap();
        store.set_meta("user", Some("alice")).unwrap();

        store.begin().unwrap();
        store.insert("tasks", row(&[("title", json!("doomed"))])).unwrap();
        store.set_meta("user", Some("mallory")).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.select("tasks", &Where::all()).unwrap().len(), 1);
        assert_eq!(store.get_meta("user").unwrap().as_deref(), Some("alice"));

        store.begin().unwrap();
        store.insert("tasks", row(&[("title", json!("kept2"))])).unwrap();
        store.commit().unwrap();
        assert_eq!(store.select("tasks", &Where::all()).unwrap().len(), 2);
    }

    #[test]
    fn transaction_misuse() {
        let store = store();
        assert!(matches!(store.commit(), Err(StoreError::NoTransaction)));
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(StoreError::NestedTransaction)));
        store.rollback().unwrap();
    }

    #[test]
    fn triggers_tracked() {
        let store = store();
        assert!(!store.triggers_disabled());
        store.set_row_triggers("tasks", false).unwrap();
        assert!(store.triggers_disabled());
        store.set_row_triggers("tasks", true).unwrap();
        assert!(!store.triggers_disabled());
    }
}
