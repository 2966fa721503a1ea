//! Transport-neutral request routing.
//!
//! [`SyncServer`] maps paths and JSON bodies onto the typed handler, so
//! any HTTP host (or an in-process loopback in tests) only has to pass
//! bytes through.

use std::sync::Arc;

use rowsync_protocol::{CleanRequest, DeletesRequest, LoadChangesRequest, UploadRequest};
use rowsync_store::{Clock, Storage};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;

const TIMESTAMP_PATH: &str = "/sync/timestamp";
const DELETES_PATH: &str = "/sync/deletes";
const UPLOAD_PATH: &str = "/sync/offline_changes";
const STATUS_PATH: &str = "/sync/upload_finished";
const LOAD_PATH: &str = "/sync/load_changes";
const CLEAN_PATH: &str = "/sync/clean_sync_dir";

/// A sync server behind a byte-level GET/POST surface.
pub struct SyncServer {
    handler: Arc<RequestHandler>,
}

impl SyncServer {
    /// Creates a server over storage, a clock, and a configuration.
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: ServerConfig) -> Self {
        Self {
            handler: Arc::new(RequestHandler::new(store, clock, config)),
        }
    }

    /// The typed handler behind the routing layer.
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Routes a GET request. The path may carry a query string.
    pub fn handle_get(&self, path: &str) -> ServerResult<Vec<u8>> {
        let (route, query) = split_query(path);
        match route {
            TIMESTAMP_PATH => encode(&self.handler.timestamp()?),
            STATUS_PATH => {
                let dir_name = query_param(query, "dir_name").ok_or_else(|| {
                    ServerError::InvalidRequest("upload_finished needs dir_name".into())
                })?;
                encode(&self.handler.upload_finished(dir_name)?)
            }
            _ => Err(ServerError::InvalidRequest(format!("no route for GET {route}"))),
        }
    }

    /// Routes a POST request with a JSON body.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (route, _) = split_query(path);
        match route {
            DELETES_PATH => {
                let request: DeletesRequest = decode(body)?;
                encode(&self.handler.deletes(&request)?)
            }
            UPLOAD_PATH => {
                let request: UploadRequest = decode(body)?;
                encode(&self.handler.offline_changes(&request)?)
            }
            LOAD_PATH => {
                let request: LoadChangesRequest = decode(body)?;
                encode(&self.handler.load_changes(&request)?)
            }
            CLEAN_PATH => {
                let request: CleanRequest = decode(body)?;
                self.handler.clean_sync_dir(&request)?;
                Ok(b"{}".to_vec())
            }
            _ => Err(ServerError::InvalidRequest(format!("no route for POST {route}"))),
        }
    }
}

fn split_query(path: &str) -> (&str, &str) {
    match path.split_once('?') {
        Some((route, query)) => (route, query),
        None => (path, ""),
    }
}

fn query_param<'q>(query: &'q str, name: &str) -> Option<&'q str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    Ok(serde_json::from_slice(body)?)
}

fn encode<T: Serialize>(value: &T) -> ServerResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::TimestampResponse;
    use rowsync_store::{Field, FieldType, ManualClock, MemoryStorage, Schema, Table};

    fn server(root: &std::path::Path) -> SyncServer {
        let store = Arc::new(MemoryStorage::new(Schema::new(vec![Table::new("tasks")
            .with_field(Field::new("title", FieldType::Text))
            .synced()])));
        SyncServer::new(
            store,
            Arc::new(ManualClock::new(1_000)),
            ServerConfig::new(root).with_inline_merge(true),
        )
    }

    #[test]
    fn timestamp_route() {
        let root = tempfile::tempdir().unwrap();
        let body = server(root.path()).handle_get("/sync/timestamp").unwrap();
        let response: TimestampResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(response.sync_timestamp, 1_000);
    }

    #[test]
    fn status_route_needs_dir_name() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path());
        assert!(matches!(
            server.handle_get("/sync/upload_finished"),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            server.handle_get("/sync/upload_finished?dir_name=missing"),
            Err(ServerError::UnknownSession(_))
        ));
    }

    #[test]
    fn unknown_routes_rejected() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path());
        assert!(matches!(
            server.handle_get("/sync/nope"),
            Err(ServerError::InvalidRequest(_))
        ));
        assert!(matches!(
            server.handle_post("/sync/nope", b"{}"),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn clean_route_returns_empty_object() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path());
        let body = server
            .handle_post("/sync/clean_sync_dir", br#"{"dir_name":"1000_user"}"#)
            .unwrap();
        assert_eq!(body, b"{}");
    }

    #[test]
    fn garbage_body_is_a_client_error() {
        let root = tempfile::tempdir().unwrap();
        let server = server(root.path());
        let err = server.handle_post("/sync/deletes", b"not json").unwrap_err();
        assert!(err.is_client_error());
    }
}
