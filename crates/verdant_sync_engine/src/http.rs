//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait so the engine does not
//! pick an HTTP library for the application.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use verdant_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse};

const PUSH_PATH: &str = "/sync/push";
const PULL_PATH: &str = "/sync/pull";

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Uses CBOR encoding for request/response bodies.
#[derive(Debug)]
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: CborEncode,
        Res: CborDecode,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request
            .encode_cbor()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;

        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, bytes = body.len(), "post");
        let response = match self.client.post(&url, body).await {
            Ok(response) => response,
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::network_retryable(e));
            }
        };
        *self.last_error.write() = None;

        Res::decode_cbor(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.post_cbor(PUSH_PATH, &request).await
    }

    async fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.post_cbor(PULL_PATH, &request).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for CBOR encoding.
pub trait CborEncode: Sync {
    /// Encodes self to CBOR bytes.
    fn encode_cbor(&self) -> Result<Vec<u8>, String>;
}

/// Trait for CBOR decoding.
pub trait CborDecode: Sized {
    /// Decodes self from CBOR bytes.
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String>;
}

impl CborEncode for PullRequest {
    fn encode_cbor(&self) -> Result<Vec<u8>, String> {
        self.encode().map_err(|e| e.to_string())
    }
}

impl CborEncode for PushRequest {
    fn encode_cbor(&self) -> Result<Vec<u8>, String> {
        self.encode().map_err(|e| e.to_string())
    }
}

impl CborDecode for PullResponse {
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

impl CborDecode for PushResponse {
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without a network. It can be switched offline to
/// simulate lost connectivity.
#[derive(Debug)]
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Returns the server requests are routed to.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Simulates connectivity loss (`false`) and recovery (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(format!("connection refused: {url}"));
        }
        self.server.handle_post(request_path(url), &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Returns the path of `url`, after `scheme://authority`.
fn request_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.find('/').map_or("/", |i| &rest[i..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_core::Cursor;

    struct EchoServer {
        page: PullResponse,
    }

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
            match path {
                PULL_PATH => {
                    PullRequest::decode(body).map_err(|e| e.to_string())?;
                    self.page.encode().map_err(|e| e.to_string())
                }
                PUSH_PATH => Ok(vec![0xff]),
                other => Err(format!("404 {other}")),
            }
        }
    }

    fn transport() -> HttpTransport<LoopbackClient<EchoServer>> {
        let page = PullResponse::new(vec![], Some(Cursor::new("7")), false);
        HttpTransport::new(
            "https://sync.example.com",
            LoopbackClient::new(EchoServer { page }),
        )
    }

    #[test]
    fn transport_creation() {
        let transport = transport();
        assert_eq!(transport.base_url(), "https://sync.example.com");
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn transport_pull_over_loopback() {
        let transport = transport();
        let page = transport
            .pull(PullRequest::new("d", None, 10))
            .await
            .unwrap();
        assert_eq!(page.next_cursor, Some(Cursor::new("7")));
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn request_path_skips_authority() {
        assert_eq!(request_path("loopback://sync/sync/push"), PUSH_PATH);
        assert_eq!(request_path("https://sync.example.com/sync/pull"), PULL_PATH);
        assert_eq!(request_path("loopback://sync"), "/");
        assert_eq!(request_path("/sync/push"), PUSH_PATH);
    }

    #[tokio::test]
    async fn host_named_sync_routes_to_endpoints() {
        let page = PullResponse::new(vec![], Some(Cursor::new("3")), false);
        let transport = HttpTransport::new(
            "loopback://sync",
            LoopbackClient::new(EchoServer { page }),
        );
        let page = transport
            .pull(PullRequest::new("d", None, 10))
            .await
            .unwrap();
        assert_eq!(page.next_cursor, Some(Cursor::new("3")));
    }

    #[tokio::test]
    async fn transport_bad_body_is_protocol_error() {
        let transport = transport();
        let result = transport.push(PushRequest::new("d", vec![])).await;
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[tokio::test]
    async fn transport_offline_is_retryable() {
        let transport = transport();
        transport.client().set_online(false);

        let err = transport
            .pull(PullRequest::new("d", None, 10))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.last_error().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn transport_closed() {
        let transport = transport();
        transport.close().unwrap();
        assert!(!transport.is_connected());

        let result = transport.pull(PullRequest::new("d", None, 10)).await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }
}
