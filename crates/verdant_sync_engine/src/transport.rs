//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use verdant_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

/// A sync transport carries requests to the backend of record.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, loopback to an in-process server, mock for
/// testing). Push and pull are the only suspension points of a sync round.
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of pending changes.
    fn push(&self, request: PushRequest) -> impl Future<Output = SyncResult<PushResponse>> + Send;

    /// Pulls one page of remote changes.
    fn pull(&self, request: PullRequest) -> impl Future<Output = SyncResult<PullResponse>> + Send;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A scripted transport for tests.
///
/// Responses are queued per endpoint and consumed in order. An empty pull
/// queue answers with an empty page at the request's cursor; an empty push
/// queue is a protocol error.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    push_responses: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_responses: Mutex<VecDeque<SyncResult<PullResponse>>>,
    pushes: Mutex<Vec<PushRequest>>,
    pulls: Mutex<Vec<PullRequest>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new, connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            push_responses: Mutex::new(VecDeque::new()),
            pull_responses: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
            pulls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of the next push.
    pub fn push_response(&self, response: SyncResult<PushResponse>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues the outcome of the next pull.
    pub fn pull_response(&self, response: SyncResult<PullResponse>) {
        self.pull_responses.lock().push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every push request received so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    /// Returns every pull request received so far.
    pub fn pulls(&self) -> Vec<PullRequest> {
        self.pulls.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pushes.lock().push(request);
        self.push_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock push response set".into())))
    }

    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let cursor = request.cursor.clone();
        self.pulls.lock().push(request);
        self.pull_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::empty(cursor)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
