//! The storage capability consumed by the sync engine.

use rowsync_protocol::{Ref, Row};

use crate::error::{StoreError, StoreResult};
use crate::filter::Where;
use crate::schema::Schema;

/// The narrow database surface both sides of the sync need.
///
/// Implementations are expected to be internally synchronized; the
/// engine calls them through `Arc<dyn Storage>` from whichever thread
/// runs the sync. One transaction can be open at a time.
pub trait Storage: Send + Sync {
    /// The schema the store was opened with.
    fn schema(&self) -> &Schema;

    /// Rows of `table` matching `filter`, in ascending primary-key order.
    fn select(&self, table: &str, filter: &Where) -> StoreResult<Vec<Row>>;

    /// Inserts a row. A missing primary key is assigned (max + 1); the
    /// stored key is returned. Fails on a duplicate key or, when
    /// referential integrity is on, a dangling foreign key.
    fn insert(&self, table: &str, row: Row) -> StoreResult<Ref>;

    /// Inserts a row, replacing any existing row with the same primary
    /// key. The row must carry its key.
    fn upsert(&self, table: &str, row: Row) -> StoreResult<()>;

    /// Sets `values` on every row matching `filter`; returns the number
    /// of rows touched. Changing a primary key fails if the new key is
    /// taken.
    fn update(&self, table: &str, filter: &Where, values: Row) -> StoreResult<usize>;

    /// Deletes every row matching `filter`; returns the number removed.
    fn delete_where(&self, table: &str, filter: &Where) -> StoreResult<usize>;

    /// Number of rows matching `filter`.
    fn count(&self, table: &str, filter: &Where) -> StoreResult<usize> {
        Ok(self.select(table, filter)?.len())
    }

    /// Opens a transaction. Fails if one is already open.
    fn begin(&self) -> StoreResult<()>;

    /// Commits the open transaction.
    fn commit(&self) -> StoreResult<()>;

    /// Rolls the open transaction back, restoring the state at `begin`.
    fn rollback(&self) -> StoreResult<()>;

    /// Toggles foreign-key enforcement. The merge applies inserts with
    /// enforcement off and repairs references before turning it back on.
    fn set_referential_integrity(&self, enabled: bool) -> StoreResult<()>;

    /// Toggles row triggers for one table during a merge, so replayed
    /// changes do not fire side effects twice.
    fn set_row_triggers(&self, table: &str, enabled: bool) -> StoreResult<()>;

    /// Reads an engine metadata value (session state, offline user).
    fn get_meta(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes an engine metadata value; `None` removes the key.
    fn set_meta(&self, key: &str, value: Option<&str>) -> StoreResult<()>;
}

/// Runs `f` inside a transaction on `store`.
///
/// Commits when `f` returns `Ok` (a failing commit surfaces as the
/// result), rolls back when it returns `Err`. The callback's error is
/// what the caller sees; a rollback failure is swallowed.
pub fn with_transaction<T, E, F>(store: &dyn Storage, f: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: FnOnce() -> Result<T, E>,
{
    store.begin()?;
    match f() {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            // Best effort: the callback's error is the interesting one.
            let _ = store.rollback();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::schema::{Field, FieldType, Table};
    use serde_json::json;

    fn store() -> MemoryStorage {
        MemoryStorage::new(Schema::new(vec![Table::new("tasks")
            .with_field(Field::new("title", FieldType::Text))
            .synced()]))
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn with_transaction_commits_on_ok() {
        let store = store();
        let assigned = with_transaction(&store, || {
            store.insert("tasks", row(&[("title", json!("kept"))]))
        })
        .unwrap();

        assert_eq!(
            store
                .select("tasks", &Where::all().eq("id", assigned))
                .unwrap()
                .len(),
            1
        );
        // the transaction is closed; a fresh one can open
        store.begin().unwrap();
        store.rollback().unwrap();
    }

    #[test]
    fn with_transaction_rolls_back_on_err() {
        let store = store();
        store
            .insert("tasks", row(&[("id", json!(1)), ("title", json!("survivor"))]))
            .unwrap();

        let result: StoreResult<()> = with_transaction(&store, || {
            store.delete_where("tasks", &Where::all())?;
            Err(StoreError::UnknownTable("boom".into()))
        });
        assert!(result.is_err());

        // the delete inside the failed callback was undone
        assert_eq!(store.select("tasks", &Where::all()).unwrap().len(), 1);
        store.begin().unwrap();
        store.rollback().unwrap();
    }
}
