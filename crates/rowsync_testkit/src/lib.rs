//! Test utilities for rowsync.
//!
//! [`SyncHarness`] wires a real [`rowsync_server::SyncServer`] to any
//! number of real [`rowsync_client::SyncClient`]s over an in-process
//! loopback transport, with a manual clock and inline merges so tests
//! are deterministic. [`fixtures`] holds the demo schema the
//! integration tests share.

pub mod fixtures;
pub mod loopback;

pub use fixtures::{demo_schema, row};
pub use loopback::{LoopbackTransport, ServerHandle, SyncHarness};
