//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so hosts can plug
//! in whatever library they already use; bodies are JSON.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;

use rowsync_protocol::{
    CleanRequest, DeletesRequest, DeletesResponse, LoadChangesRequest, LoadChangesResponse,
    SessionStatus, TimestampResponse, UploadRequest, UploadResponse,
};

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP layer (reqwest,
/// ureq, a platform webview bridge, or the in-process loopback below).
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Sends a POST request with a JSON body and returns the response
    /// body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the transport believes it can reach the server.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn check_connected(&self) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }

    fn decode<Res: DeserializeOwned>(&self, body: &[u8]) -> SyncResult<Res> {
        serde_json::from_slice(body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }

    fn get_json<Res: DeserializeOwned>(&self, endpoint: &str) -> SyncResult<Res> {
        self.check_connected()?;
        let url = format!("{}{}", self.base_url, endpoint);
        let body = self.client.get(&url).map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            SyncError::transport_retryable(e)
        })?;
        self.decode(&body)
    }

    fn post_json<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.check_connected()?;
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let url = format!("{}{}", self.base_url, endpoint);
        let response = self.client.post(&url, body).map_err(|e| {
            self.connected.store(false, Ordering::SeqCst);
            SyncError::transport_retryable(e)
        })?;
        self.decode(&response)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn fetch_timestamp(&self) -> SyncResult<TimestampResponse> {
        self.get_json("/sync/timestamp")
    }

    fn fetch_deletes(&self, request: &DeletesRequest) -> SyncResult<DeletesResponse> {
        self.post_json("/sync/deletes", request)
    }

    fn upload_changes(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        self.post_json("/sync/offline_changes", request)
    }

    fn fetch_status(&self, dir_name: &str) -> SyncResult<SessionStatus> {
        self.get_json(&format!("/sync/upload_finished?dir_name={dir_name}"))
    }

    fn load_changes(&self, request: &LoadChangesRequest) -> SyncResult<LoadChangesResponse> {
        self.post_json("/sync/load_changes", request)
    }

    fn clean_sync_dir(&self, request: &CleanRequest) -> SyncResult<()> {
        let _: serde_json::Value = self.post_json("/sync/clean_sync_dir", request)?;
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a GET request for the given path (query string included).
    fn handle_get(&self, path: &str) -> Result<Vec<u8>, String>;

    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A loopback HTTP client that routes requests directly to a server
/// value in the same process. Useful for testing without network
/// overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// The wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

fn loopback_path(url: &str) -> &str {
    url.find("/sync/").map(|i| &url[i..]).unwrap_or(url)
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        self.server.handle_get(loopback_path(url))
    }

    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        self.server.handle_post(loopback_path(url), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<Vec<u8>>>,
        seen_urls: Mutex<Vec<String>>,
    }

    impl TestClient {
        fn set_response(&self, resp: Vec<u8>) {
            *self.response.lock() = Some(resp);
        }
    }

    impl HttpClient for TestClient {
        fn get(&self, url: &str) -> Result<Vec<u8>, String> {
            self.seen_urls.lock().push(url.to_string());
            self.response.lock().clone().ok_or_else(|| "no response".into())
        }

        fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.seen_urls.lock().push(url.to_string());
            self.response.lock().clone().ok_or_else(|| "no response".into())
        }
    }

    #[test]
    fn timestamp_decoding_and_url() {
        let client = TestClient::default();
        client.set_response(br#"{"sync_timestamp":1234}"#.to_vec());
        let transport = HttpTransport::new("https://sync.example.com", client);

        let ts = transport.fetch_timestamp().unwrap();
        assert_eq!(ts.sync_timestamp, 1234);
        assert_eq!(
            transport.client.seen_urls.lock()[0],
            "https://sync.example.com/sync/timestamp"
        );
    }

    #[test]
    fn failed_request_marks_disconnected() {
        let client = TestClient::default();
        let transport = HttpTransport::new("https://sync.example.com", client);

        let err = transport.fetch_timestamp().unwrap_err();
        assert!(err.is_retryable());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.fetch_timestamp(),
            Err(SyncError::NotConnected)
        ));
    }

    #[test]
    fn garbage_response_is_protocol_error() {
        let client = TestClient::default();
        client.set_response(b"not json".to_vec());
        let transport = HttpTransport::new("https://sync.example.com", client);
        assert!(matches!(
            transport.fetch_timestamp(),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn loopback_strips_base_url() {
        assert_eq!(
            loopback_path("https://x.test/sync/timestamp"),
            "/sync/timestamp"
        );
        assert_eq!(loopback_path("/sync/deletes"), "/sync/deletes");
    }
}
