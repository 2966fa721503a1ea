//! An in-process client/server pair wired over the loopback transport.

use std::sync::Arc;

use rowsync_client::{
    HttpTransport, LoopbackClient, LoopbackServer, PollConfig, SyncClient, SyncConfig,
};
use rowsync_server::{ServerConfig, SyncServer};
use rowsync_store::{ManualClock, MemoryStorage, Storage, SyncInfoStore};
use tempfile::TempDir;

use crate::fixtures::demo_schema;

/// The transport a harness client talks through.
pub type LoopbackTransport = HttpTransport<LoopbackClient<ServerHandle>>;

/// A shareable handle onto an in-process [`SyncServer`], bridging its
/// byte-level routing into the client's loopback trait.
#[derive(Clone)]
pub struct ServerHandle {
    server: Arc<SyncServer>,
}

impl LoopbackServer for ServerHandle {
    fn handle_get(&self, path: &str) -> Result<Vec<u8>, String> {
        self.server.handle_get(path).map_err(|e| e.to_string())
    }

    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.server.handle_post(path, body).map_err(|e| e.to_string())
    }
}

/// One server plus any number of loopback clients, each with its own
/// local database. Everything runs deterministically: merges are
/// inline and the clock is manual.
pub struct SyncHarness {
    server_store: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    handle: ServerHandle,
    _sessions: TempDir,
}

impl SyncHarness {
    /// Creates a harness over the demo schema.
    pub fn new() -> Self {
        Self::with_schema(demo_schema())
    }

    /// Creates a harness over a custom schema. Client databases created
    /// by [`Self::client`] use the same schema.
    pub fn with_schema(schema: rowsync_store::Schema) -> Self {
        let sessions = TempDir::new().expect("failed to create sessions directory");
        let server_store = Arc::new(MemoryStorage::new(schema));
        let clock = Arc::new(ManualClock::new(1_000));
        let server = SyncServer::new(
            server_store.clone(),
            clock.clone(),
            ServerConfig::new(sessions.path()).with_inline_merge(true),
        );
        Self {
            server_store,
            clock,
            handle: ServerHandle {
                server: Arc::new(server),
            },
            _sessions: sessions,
        }
    }

    /// A new client device with an empty local database.
    pub fn client(&self) -> SyncClient<LoopbackTransport> {
        let store = Arc::new(MemoryStorage::new(self.server_store.schema().clone()));
        let transport = HttpTransport::new(
            "http://sync.local",
            LoopbackClient::new(self.handle.clone()),
        );
        SyncClient::new(store, transport)
            .with_config(SyncConfig::new("http://sync.local").with_poll(PollConfig::single_shot()))
    }

    /// The server's storage, for direct assertions.
    pub fn server_store(&self) -> Arc<MemoryStorage> {
        self.server_store.clone()
    }

    /// Shadow-record access to the server's storage.
    pub fn server_infos(&self) -> SyncInfoStore {
        SyncInfoStore::new(self.server_store.clone())
    }

    /// The clock behind the server's timestamp oracle.
    pub fn clock(&self) -> Arc<ManualClock> {
        self.clock.clone()
    }
}

impl Default for SyncHarness {
    fn default() -> Self {
        Self::new()
    }
}
