//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::oplog::ServerOplog;
use std::sync::Arc;
use tracing::{debug, warn};
use verdant_core::Cursor;
use verdant_sync_protocol::{
    AckStatus, ItemAck, PullRequest, PullResponse, PushRequest, PushResponse, PROTOCOL_VERSION,
};

/// Context for request handling.
#[derive(Debug)]
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Server oplog (shared across all handlers).
    pub oplog: Arc<ServerOplog>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        Self { config, oplog }
    }
}

/// Handler for sync requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a pull request.
    ///
    /// A missing cursor pulls from the beginning. A limit of `0` means the
    /// server maximum.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        check_version(request.protocol_version)?;

        let after = match &request.cursor {
            None => 0,
            Some(cursor) => cursor.as_str().parse::<u64>().map_err(|_| {
                ServerError::InvalidRequest(format!("malformed cursor {cursor}"))
            })?,
        };

        let max = self.context.config.max_pull_batch;
        let limit = if request.limit == 0 {
            max
        } else {
            request.limit.min(max)
        };

        let (changes, has_more) = self.context.oplog.changes_since(after, limit);
        let next_cursor = match changes.last() {
            Some(last) => Some(Cursor::new(last.revision.to_string())),
            None => request.cursor,
        };

        debug!(
            device = %request.device_id,
            after,
            changes = changes.len(),
            has_more,
            "pull"
        );
        Ok(PullResponse::new(changes, next_cursor, has_more))
    }

    /// Handles a push request.
    ///
    /// Items are applied in order; each gets its own acknowledgment.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        check_version(request.protocol_version)?;

        if request.items.len() > self.context.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "too many items: {} > {}",
                request.items.len(),
                self.context.config.max_push_batch
            )));
        }

        let acks = request
            .items
            .iter()
            .map(|item| {
                let status = self.context.oplog.apply(&request.device_id, item);
                if let AckStatus::Rejected { reason } = &status {
                    warn!(device = %request.device_id, sequence = item.local_sequence, %reason, "push item rejected");
                }
                ItemAck {
                    local_sequence: item.local_sequence,
                    status,
                }
            })
            .collect::<Vec<_>>();

        debug!(device = %request.device_id, items = acks.len(), "push");
        Ok(PushResponse::new(acks))
    }
}

fn check_version(client: u16) -> ServerResult<()> {
    if client == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ServerError::ProtocolMismatch {
            server: PROTOCOL_VERSION,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdant_core::{FieldValue, Fields, Operation};
    use verdant_sync_protocol::PushItem;

    fn handler(config: ServerConfig) -> RequestHandler {
        let context = HandlerContext::new(config, Arc::new(ServerOplog::new()));
        RequestHandler::new(Arc::new(context))
    }

    fn create(id: &str, seq: u64) -> PushItem {
        let mut fields = Fields::new();
        fields.insert("title".into(), FieldValue::from("Repot"));
        PushItem {
            collection: "tasks".into(),
            record_id: id.into(),
            operation: Operation::Create,
            local_sequence: seq,
            base_revision: 0,
            updated_at: 100,
            fields,
        }
    }

    #[test]
    fn push_then_pull() {
        let handler = handler(ServerConfig::default());
        let push = PushRequest::new("dev-a", vec![create("t-1", 1), create("t-2", 2)]);
        let response = handler.handle_push(push).unwrap();
        assert_eq!(response.acks.len(), 2);
        assert!(matches!(
            response.acks[1].status,
            AckStatus::Applied { revision: 2, .. }
        ));

        let pull = handler
            .handle_pull(PullRequest::new("dev-b", None, 10))
            .unwrap();
        assert_eq!(pull.changes.len(), 2);
        assert_eq!(pull.next_cursor, Some(Cursor::new("2")));
        assert!(!pull.has_more);

        let pull = handler
            .handle_pull(PullRequest::new("dev-b", pull.next_cursor, 10))
            .unwrap();
        assert!(pull.changes.is_empty());
        assert_eq!(pull.next_cursor, Some(Cursor::new("2")));
    }

    #[test]
    fn pull_limit_capped_by_config() {
        let handler = handler(ServerConfig::default().with_max_pull_batch(1));
        handler
            .handle_push(PushRequest::new("dev-a", vec![create("t-1", 1), create("t-2", 2)]))
            .unwrap();

        let pull = handler
            .handle_pull(PullRequest::new("dev-b", None, 50))
            .unwrap();
        assert_eq!(pull.changes.len(), 1);
        assert!(pull.has_more);

        let pull = handler
            .handle_pull(PullRequest::new("dev-b", None, 0))
            .unwrap();
        assert_eq!(pull.changes.len(), 1);
    }

    #[test]
    fn push_batch_limit() {
        let handler = handler(ServerConfig::default().with_max_push_batch(1));
        let push = PushRequest::new("dev-a", vec![create("t-1", 1), create("t-2", 2)]);
        assert!(matches!(
            handler.handle_push(push),
            Err(ServerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn version_and_cursor_checks() {
        let handler = handler(ServerConfig::default());
        let mut push = PushRequest::new("dev-a", vec![]);
        push.protocol_version = 99;
        assert!(matches!(
            handler.handle_push(push),
            Err(ServerError::ProtocolMismatch { client: 99, .. })
        ));

        let pull = PullRequest::new("dev-a", Some(Cursor::new("not-a-number")), 10);
        assert!(matches!(
            handler.handle_pull(pull),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
