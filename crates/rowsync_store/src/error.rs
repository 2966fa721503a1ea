//! Error types for the storage layer.

use rowsync_protocol::Ref;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The named table is not part of the schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A row was written without a usable primary key.
    #[error("row in '{table}' has no primary key value")]
    MissingPrimaryKey {
        /// Table the row belongs to.
        table: String,
    },

    /// An insert collided with an existing primary key.
    #[error("duplicate primary key {pk} in '{table}'")]
    Duplicate {
        /// Table the row belongs to.
        table: String,
        /// The colliding key.
        pk: Ref,
    },

    /// A write violated referential integrity.
    #[error("foreign key violation: {table}.{column} -> {target} ({pk})")]
    ForeignKey {
        /// Referencing table.
        table: String,
        /// Referencing column.
        column: String,
        /// Referenced table.
        target: String,
        /// The dangling key.
        pk: Ref,
    },

    /// Commit or rollback without a matching begin.
    #[error("no transaction in progress")]
    NoTransaction,

    /// A nested begin; the engine runs one transaction at a time.
    #[error("a transaction is already in progress")]
    NestedTransaction,
}
