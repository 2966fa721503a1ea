//! Transport layer abstraction for sync operations.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rowsync_protocol::{
    CleanRequest, DeletesRequest, DeletesResponse, LoadChangesRequest, LoadChangesResponse,
    SessionStatus, TimestampResponse, UploadRequest, UploadResponse,
};

use crate::error::{SyncError, SyncResult};

/// A sync transport handles network communication with the sync server.
///
/// One method per server operation; implementations may go over HTTP,
/// an in-process loopback, or a mock for testing.
pub trait SyncTransport: Send + Sync {
    /// Requests a fresh sync timestamp from the oracle.
    fn fetch_timestamp(&self) -> SyncResult<TimestampResponse>;

    /// Requests server-side deletes past the client's watermarks.
    fn fetch_deletes(&self, request: &DeletesRequest) -> SyncResult<DeletesResponse>;

    /// Uploads a change-set; the server accepts it and processes it
    /// out of band.
    fn upload_changes(&self, request: &UploadRequest) -> SyncResult<UploadResponse>;

    /// Polls the processing status of an accepted upload.
    fn fetch_status(&self, dir_name: &str) -> SyncResult<SessionStatus>;

    /// Requests a batch of inserted/updated rows past the watermarks.
    fn load_changes(&self, request: &LoadChangesRequest) -> SyncResult<LoadChangesResponse>;

    /// Asks the server to remove the session directory. Best-effort.
    fn clean_sync_dir(&self, request: &CleanRequest) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Responses are scripted; `fetch_status` and `load_changes` consume
/// queues so a test can emulate a pending-then-finished poll and a
/// multi-batch download.
#[derive(Default)]
pub struct MockTransport {
    timestamp: Mutex<Option<TimestampResponse>>,
    deletes: Mutex<Option<DeletesResponse>>,
    upload: Mutex<Option<UploadResponse>>,
    statuses: Mutex<VecDeque<SessionStatus>>,
    batches: Mutex<VecDeque<LoadChangesResponse>>,
    uploaded: Mutex<Vec<UploadRequest>>,
    cleaned: Mutex<Vec<String>>,
    offline: Mutex<bool>,
}

impl MockTransport {
    /// Creates a mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the timestamp response.
    pub fn set_timestamp(&self, response: TimestampResponse) {
        *self.timestamp.lock() = Some(response);
    }

    /// Scripts the deletes response.
    pub fn set_deletes(&self, response: DeletesResponse) {
        *self.deletes.lock() = Some(response);
    }

    /// Scripts the upload acknowledgment.
    pub fn set_upload(&self, response: UploadResponse) {
        *self.upload.lock() = Some(response);
    }

    /// Appends a status to the poll queue; the last one is repeated.
    pub fn push_status(&self, status: SessionStatus) {
        self.statuses.lock().push_back(status);
    }

    /// Appends a download batch; after the queue drains, an empty
    /// response is returned.
    pub fn push_batch(&self, batch: LoadChangesResponse) {
        self.batches.lock().push_back(batch);
    }

    /// Simulates losing the network.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Change-sets the client uploaded, in order.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploaded.lock().clone()
    }

    /// Session directories the client asked to clean.
    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }

    fn check_online(&self) -> SyncResult<()> {
        if *self.offline.lock() {
            return Err(SyncError::NotConnected);
        }
        Ok(())
    }
}

impl SyncTransport for MockTransport {
    fn fetch_timestamp(&self) -> SyncResult<TimestampResponse> {
        self.check_online()?;
        self.timestamp
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no mock timestamp response set".into()))
    }

    fn fetch_deletes(&self, _request: &DeletesRequest) -> SyncResult<DeletesResponse> {
        self.check_online()?;
        Ok(self.deletes.lock().clone().unwrap_or_default())
    }

    fn upload_changes(&self, request: &UploadRequest) -> SyncResult<UploadResponse> {
        self.check_online()?;
        self.uploaded.lock().push(request.clone());
        self.upload
            .lock()
            .clone()
            .ok_or_else(|| SyncError::Protocol("no mock upload response set".into()))
    }

    fn fetch_status(&self, _dir_name: &str) -> SyncResult<SessionStatus> {
        self.check_online()?;
        let mut statuses = self.statuses.lock();
        if statuses.len() > 1 {
            Ok(statuses.pop_front().unwrap_or_else(SessionStatus::pending))
        } else {
            statuses
                .front()
                .cloned()
                .ok_or_else(|| SyncError::Protocol("no mock status set".into()))
        }
    }

    fn load_changes(&self, _request: &LoadChangesRequest) -> SyncResult<LoadChangesResponse> {
        self.check_online()?;
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    fn clean_sync_dir(&self, request: &CleanRequest) -> SyncResult<()> {
        self.check_online()?;
        self.cleaned.lock().push(request.dir_name.clone());
        Ok(())
    }
}
