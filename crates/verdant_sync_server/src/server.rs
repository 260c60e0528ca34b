//! Main sync server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::oplog::ServerOplog;
use std::sync::Arc;
use verdant_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse, RemoteRecord};

/// Path of the push endpoint.
pub const PUSH_PATH: &str = "/sync/push";

/// Path of the pull endpoint.
pub const PULL_PATH: &str = "/sync/pull";

/// The sync server.
///
/// Holds the backend's record state and answers push and pull requests.
/// There is no network listener: transports call the typed handlers
/// directly, or pass CBOR bodies to [`SyncServer::handle_bytes`].
///
/// # Example
///
/// ```
/// use verdant_sync_server::{SyncServer, ServerConfig};
/// use verdant_sync_protocol::PullRequest;
///
/// let server = SyncServer::new(ServerConfig::default());
/// let page = server.handle_pull(PullRequest::new("device", None, 10)).unwrap();
/// assert!(page.changes.is_empty());
/// ```
#[derive(Debug)]
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_oplog(config, Arc::new(ServerOplog::new()))
    }

    /// Creates a sync server with an existing oplog.
    pub fn with_oplog(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, oplog));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// Handles a CBOR-encoded request addressed to `path`.
    pub fn handle_bytes(&self, path: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        match path {
            PUSH_PATH => {
                let request = PushRequest::decode(body)?;
                Ok(self.handle_push(request)?.encode()?)
            }
            PULL_PATH => {
                let request = PullRequest::decode(body)?;
                Ok(self.handle_pull(request)?.encode()?)
            }
            other => Err(ServerError::UnknownEndpoint(other.to_string())),
        }
    }

    /// Returns the current server cursor (latest revision).
    pub fn cursor(&self) -> u64 {
        self.context.oplog.revision()
    }

    /// Returns the current state of a record.
    pub fn record(&self, collection: &str, id: &str) -> Option<RemoteRecord> {
        self.context.oplog.record(collection, id)
    }

    /// Returns the number of applied changes.
    pub fn change_count(&self) -> usize {
        self.context.oplog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_core::{Cursor, FieldValue, Fields, Operation};
    use verdant_sync_protocol::{AckStatus, PushItem};

    fn create(id: &str) -> PushItem {
        let mut fields = Fields::new();
        fields.insert("name".into(), FieldValue::from("Fern"));
        PushItem {
            collection: "plants".into(),
            record_id: id.into(),
            operation: Operation::Create,
            local_sequence: 1,
            base_revision: 0,
            updated_at: 5,
            fields,
        }
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::new(ServerConfig::default());
        assert_eq!(server.cursor(), 0);
        assert_eq!(server.change_count(), 0);
        assert!(server.record("plants", "p-1").is_none());
    }

    #[test]
    fn cbor_round() {
        let server = SyncServer::new(ServerConfig::default());

        let body = PushRequest::new("dev-a", vec![create("p-1")]).encode().unwrap();
        let reply = PushResponse::decode(&server.handle_bytes(PUSH_PATH, &body).unwrap()).unwrap();
        assert!(matches!(reply.acks[0].status, AckStatus::Applied { revision: 1, .. }));

        let body = PullRequest::new("dev-b", None, 10).encode().unwrap();
        let reply = PullResponse::decode(&server.handle_bytes(PULL_PATH, &body).unwrap()).unwrap();
        assert_eq!(reply.changes.len(), 1);
        assert_eq!(reply.next_cursor, Some(Cursor::new("1")));
        assert_eq!(server.record("plants", "p-1").unwrap().origin, "dev-a");
    }

    #[test]
    fn bad_bytes_and_paths() {
        let server = SyncServer::new(ServerConfig::default());
        assert!(matches!(
            server.handle_bytes("/sync/other", &[]),
            Err(ServerError::UnknownEndpoint(_))
        ));
        let err = server.handle_bytes(PUSH_PATH, &[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn shared_oplog() {
        let oplog = Arc::new(ServerOplog::new());
        let server = SyncServer::with_oplog(ServerConfig::default(), Arc::clone(&oplog));

        server
            .handle_push(PushRequest::new("dev-a", vec![create("p-1")]))
            .unwrap();

        assert_eq!(oplog.len(), 1);
        assert_eq!(server.cursor(), 1);
    }
}
