//! Relational schema description for synchronized tables.

use serde::{Deserialize, Serialize};

/// Suffix shared by all shadow tables.
const SYNC_INFO_SUFFIX: &str = "_sync_info";

/// Returns the shadow-table name for a data table.
pub fn sync_info_table(data_table: &str) -> String {
    format!("{data_table}{SYNC_INFO_SUFFIX}")
}

/// Column type, used to coerce wire values during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// UTF-8 text.
    Text,
    /// Date/time; arrives as RFC 3339 text or epoch milliseconds.
    Date,
    /// Arbitrary JSON; may arrive double-encoded as a string.
    Json,
}

/// A column of a synchronized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ftype: FieldType,
    /// Derived server-side; stripped from uploaded rows.
    #[serde(default)]
    pub calculated: bool,
    /// Target table when this column is a foreign key.
    #[serde(default)]
    pub reftable: Option<String>,
}

impl Field {
    /// Creates a plain field.
    pub fn new(name: impl Into<String>, ftype: FieldType) -> Self {
        Self {
            name: name.into(),
            ftype,
            calculated: false,
            reftable: None,
        }
    }

    /// Marks the field as calculated.
    pub fn calculated(mut self) -> Self {
        self.calculated = true;
        self
    }

    /// Makes the field a foreign key into `table`.
    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.reftable = Some(table.into());
        self
    }
}

/// A synchronized table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Primary-key column name.
    pub pk_name: String,
    /// Columns, excluding the primary key.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Uniqueness constraints, each a set of column names.
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    /// Whether the table takes part in synchronization.
    #[serde(default)]
    pub synced: bool,
}

impl Table {
    /// Creates a table with the conventional `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pk_name: "id".into(),
            fields: Vec::new(),
            unique_constraints: Vec::new(),
            synced: false,
        }
    }

    /// Overrides the primary-key column name.
    pub fn with_pk(mut self, pk_name: impl Into<String>) -> Self {
        self.pk_name = pk_name.into();
        self
    }

    /// Adds a field.
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a uniqueness constraint over the named columns.
    pub fn with_unique(mut self, columns: &[&str]) -> Self {
        self.unique_constraints
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Enables synchronization for the table.
    pub fn synced(mut self) -> Self {
        self.synced = true;
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Iterates the foreign-key fields of the table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.reftable.is_some())
    }

    /// Name of this table's shadow table.
    pub fn sync_info_table(&self) -> String {
        sync_info_table(&self.name)
    }
}

/// The full schema the sync engine operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    tables: Vec<Table>,
}

impl Schema {
    /// Creates a schema from its tables.
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// All tables.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables taking part in synchronization.
    pub fn synced_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().filter(|t| t.synced)
    }

    /// Synced fields referencing `target` via a foreign key, with the
    /// table that owns each field.
    pub fn referencing_fields(&self, target: &str) -> Vec<(&Table, &Field)> {
        self.synced_tables()
            .flat_map(|t| {
                t.foreign_keys()
                    .filter(|f| f.reftable.as_deref() == Some(target))
                    .map(move |f| (t, f))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Schema {
        Schema::new(vec![
            Table::new("tasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_unique(&["title"])
                .synced(),
            Table::new("subtasks")
                .with_field(Field::new("title", FieldType::Text))
                .with_field(Field::new("task_ref", FieldType::Integer).references("tasks"))
                .synced(),
            Table::new("audit_log").with_field(Field::new("entry", FieldType::Text)),
        ])
    }

    #[test]
    fn shadow_table_naming() {
        assert_eq!(sync_info_table("tasks"), "tasks_sync_info");
        assert_eq!(demo().table("tasks").unwrap().sync_info_table(), "tasks_sync_info");
    }

    #[test]
    fn synced_tables_filtered() {
        let schema = demo();
        let names: Vec<&str> = schema.synced_tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["tasks", "subtasks"]);
    }

    #[test]
    fn reverse_fk_lookup() {
        let schema = demo();
        let refs = schema.referencing_fields("tasks");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.name, "subtasks");
        assert_eq!(refs[0].1.name, "task_ref");

        assert!(schema.referencing_fields("subtasks").is_empty());
    }

    #[test]
    fn schema_roundtrip() {
        let schema = demo();
        let text = serde_json::to_string(&schema).unwrap();
        let decoded: Schema = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, schema);
    }
}
