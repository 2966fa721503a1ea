//! # Rowsync Client
//!
//! The offline-first side of rowsync: tracks local edits through
//! per-row shadow records, extracts them into a change-set, uploads it
//! to a sync server, reconciles the server's key translations and
//! unique-conflict resolutions, and pulls remote deletes and changes
//! back down — all within one local transaction per sync.
//!
//! The central type is [`SyncClient`], constructed from a storage
//! handle and a [`SyncTransport`]. Hosts plug in their HTTP stack via
//! [`HttpClient`] and their power management via [`WakeLockProvider`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod download;
mod error;
mod extract;
mod http;
mod session;
mod transport;
mod wake;

pub use client::{SyncClient, SyncOutcome};
pub use config::{PollConfig, SyncConfig};
pub use download::{apply_deletes, run_changes_loop, watermarks};
pub use error::{SyncError, SyncResult};
pub use extract::extract_changes;
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer};
pub use session::{ClientSession, UploadMarker};
pub use transport::{MockTransport, SyncTransport};
pub use wake::{CountingWakeLock, NoopWakeLock, WakeGuard, WakeLockProvider};
