//! # Rowsync Protocol
//!
//! Wire types for the rowsync offline synchronization protocol.
//!
//! This crate provides:
//! - `RowChange` and `ChangeSet` for uploaded client edits
//! - `TranslationMap` and `UniqueConflicts` for merge results
//! - Request/response types for the six sync operations
//!
//! Everything here serializes with serde to the JSON wire format; the
//! session artifacts on the server (`changes.json`, `translated-ids.json`,
//! `unique-conflicts.json`, `error.json`) reuse the same types. This is a
//! pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod messages;
mod translation;

pub use changes::{pk_of, ChangeSet, DeleteRef, Ref, Row, RowChange, TableChanges, Timestamp};
pub use messages::{
    CleanRequest, DeletesRequest, DeletesResponse, LoadChangesRequest, LoadChangesResponse,
    LoadedRow, SessionError, SessionStatus, TableBatch, TimestampResponse, UploadRequest,
    UploadResponse, Watermark,
};
pub use translation::{ordered_translations, TableTranslations, TranslationMap, UniqueConflicts};
