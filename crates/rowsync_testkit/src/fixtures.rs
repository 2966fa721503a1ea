//! The demo schema and row builders shared by the integration tests.

use rowsync_protocol::Row;
use rowsync_store::{Field, FieldType, Schema, Table};
use serde_json::Value;

/// A two-table schema exercising every schema feature: a unique
/// constraint, a foreign key, a calculated column and coercible
/// column types.
pub fn demo_schema() -> Schema {
    Schema::new(vec![
        Table::new("tasks")
            .with_field(Field::new("title", FieldType::Text))
            .with_field(Field::new("done", FieldType::Bool))
            .with_field(Field::new("due", FieldType::Date))
            .with_field(Field::new("meta", FieldType::Json))
            .with_field(Field::new("subtask_count", FieldType::Integer).calculated())
            .with_unique(&["title"])
            .synced(),
        Table::new("subtasks")
            .with_field(Field::new("title", FieldType::Text))
            .with_field(Field::new("task_ref", FieldType::Integer).references("tasks"))
            .synced(),
    ])
}

/// Builds a row from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn demo_schema_shape() {
        let schema = demo_schema();
        assert_eq!(schema.synced_tables().count(), 2);
        let refs = schema.referencing_fields("tasks");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].1.name, "task_ref");
    }

    #[test]
    fn row_builder() {
        let r = row(&[("id", json!(1)), ("title", json!("x"))]);
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("title"), Some(&json!("x")));
    }
}
