//! # Rowsync Store
//!
//! Storage capability and sync metadata layer for rowsync.
//!
//! This crate provides:
//! - The [`Storage`] trait — the narrow capability the sync engine
//!   consumes (select/insert/update/delete with a structured filter,
//!   transactions, integrity toggles, meta key/value)
//! - [`MemoryStorage`] — the in-memory reference implementation
//! - [`Schema`] — the relational description of synchronized tables
//! - [`Where`] — a parameterized filter, never interpolated SQL text
//! - [`SyncInfoStore`] — the per-row shadow records driving sync
//!
//! Concrete database engines live outside this workspace; anything that
//! implements [`Storage`] can back both the client and the server.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod error;
mod filter;
mod memory;
mod schema;
mod storage;
mod sync_info;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use filter::{Cond, Where};
pub use memory::MemoryStorage;
pub use schema::{sync_info_table, Field, FieldType, Schema, Table};
pub use storage::{with_transaction, Storage};
pub use sync_info::{SyncInfo, SyncInfoStore};
