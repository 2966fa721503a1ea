//! Server side of the row synchronization protocol.
//!
//! Serves six operations over any byte-level GET/POST host: timestamp
//! issuance, the deletes phase, upload acceptance with asynchronous
//! merging, status polling, paginated change download, and session
//! cleanup. Uploads are snapshotted into per-session directories; the
//! merge applies each change-set in a single transaction and leaves
//! result artifacts for the client to poll.

mod config;
mod error;
mod guard;
mod handler;
mod merge;
mod oracle;
mod server;
mod session;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use guard::safe_deletes;
pub use handler::RequestHandler;
pub use merge::MergeEngine;
pub use oracle::TimestampOracle;
pub use server::SyncServer;
pub use session::SessionDir;
