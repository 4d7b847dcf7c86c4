// Request dispatch: decode, run push/pull/pullr against the store, build the reply

use crate::relay::indicator::StatusIndicator;
use crate::relay::message::{Action, DecodeError, Dest, Reply, Request};
use crate::relay::query::QuerySpec;
use crate::relay::storage::{MessageStore, StoreError};
use serde_json::{Map, Value};

/// Why a request produced no reply
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Undecodable body or missing routing fields; there is nowhere to reply
    #[error("malformed request: {0}")]
    Malformed(#[from] DecodeError),

    /// The store could not persist the change; nothing was applied
    #[error("storage failure while handling {action} for {dest}: {source}")]
    Storage {
        action: &'static str,
        dest: Dest,
        #[source]
        source: StoreError,
    },
}

/// Handles one request at a time against an owned store
pub struct RequestHandler<I> {
    store: MessageStore,
    indicator: I,
}

impl<I: StatusIndicator> RequestHandler<I> {
    pub fn new(store: MessageStore, indicator: I) -> Self {
        Self { store, indicator }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    /// Push the current count to the indicator
    pub fn refresh_indicator(&mut self) {
        self.indicator.notify(self.store.size());
    }

    /// Handle a raw request body
    ///
    /// Returns the reply to deliver, or `None` when the request is dropped.
    /// Drops are logged here.
    pub fn handle(&mut self, body: &[u8]) -> Option<Reply> {
        match self.try_handle(body) {
            Ok(reply) => Some(reply),
            Err(RequestError::Malformed(e)) => {
                tracing::warn!(
                    "Dropping request '{}': {}",
                    String::from_utf8_lossy(body).trim_end(),
                    e
                );
                None
            }
            Err(e) => {
                tracing::error!("{}", e);
                None
            }
        }
    }

    /// Handle a raw request body, surfacing why no reply was produced
    pub fn try_handle(&mut self, body: &[u8]) -> Result<Reply, RequestError> {
        let request = Request::from_bytes(body)?;
        self.dispatch(request)
    }

    /// Run a decoded request
    pub fn dispatch(&mut self, request: Request) -> Result<Reply, RequestError> {
        let Request { action, dest, fields } = request;

        match action {
            Action::Push => self.push(dest, fields),
            Action::Pull => self.pull(dest, &fields),
            Action::PullRead => Ok(self.pull_read(dest, &fields)),
            Action::Unknown(action) => {
                tracing::info!("Received message with unknown command '{}'", action);
                Ok(Reply::unknown_command(dest, &action))
            }
        }
    }

    fn push(&mut self, dest: Dest, fields: Map<String, Value>) -> Result<Reply, RequestError> {
        tracing::info!("PUSH request received");

        self.store
            .push(fields.into())
            .map_err(|source| RequestError::Storage {
                action: "push",
                dest: dest.clone(),
                source,
            })?;

        self.refresh_indicator();
        Ok(Reply::success(dest))
    }

    fn pull(&mut self, dest: Dest, fields: &Map<String, Value>) -> Result<Reply, RequestError> {
        tracing::info!("PULL request received");

        let predicate = QuerySpec::from_fields(fields).build_predicate();
        let pulled = self
            .store
            .pull_first_matching(&predicate)
            .map_err(|source| RequestError::Storage {
                action: "pull",
                dest: dest.clone(),
                source,
            })?;

        match pulled {
            Some(message) => {
                self.refresh_indicator();
                Ok(Reply::message(dest, message))
            }
            None => Ok(Reply::no_messages(dest)),
        }
    }

    fn pull_read(&self, dest: Dest, fields: &Map<String, Value>) -> Reply {
        tracing::info!("PULLR request received");

        let predicate = QuerySpec::from_fields(fields).build_predicate();
        match self.store.peek_first_matching(&predicate) {
            Some(message) => Reply::message(dest, message),
            None => Reply::no_messages(dest),
        }
    }

    /// Give back the store, e.g. to flush it on shutdown
    pub fn into_store(self) -> MessageStore {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    /// Records every count it is notified with
    #[derive(Default)]
    struct RecordingIndicator {
        counts: Vec<usize>,
    }

    impl StatusIndicator for RecordingIndicator {
        fn notify(&mut self, count: usize) {
            self.counts.push(count);
        }
    }

    fn handler() -> (TempDir, RequestHandler<RecordingIndicator>) {
        let dir = tempdir().unwrap();
        let store = MessageStore::open(&dir.path().join("bottle.db")).unwrap();
        (dir, RequestHandler::new(store, RecordingIndicator::default()))
    }

    fn send(handler: &mut RequestHandler<RecordingIndicator>, request: Value) -> Option<Reply> {
        handler.handle(request.to_string().as_bytes())
    }

    #[test]
    fn test_push_then_pull_scenario() {
        let (_dir, mut handler) = handler();

        let reply = send(
            &mut handler,
            json!({"Action": "push", "Dest": "A", "Author": "alice", "Subject": "hi"}),
        )
        .unwrap();
        assert_eq!(reply.dest, Dest::new("A"));
        assert_eq!(reply.payload, json!({"Status": "success"}));
        assert_eq!(handler.store().size(), 1);

        let reply = send(
            &mut handler,
            json!({"Action": "pull", "Dest": "B", "Query_Author": "al*"}),
        )
        .unwrap();
        assert_eq!(reply.dest, Dest::new("B"));
        assert_eq!(reply.payload, json!({"Author": "alice", "Subject": "hi"}));
        assert_eq!(handler.store().size(), 0);

        let reply = send(
            &mut handler,
            json!({"Action": "pull", "Dest": "B", "Query_Subject": "*"}),
        )
        .unwrap();
        assert_eq!(
            reply.payload,
            json!({"Status": "failed", "Reason": "No messages available"})
        );

        assert_eq!(handler.indicator().counts, vec![1, 0]);
    }

    #[test]
    fn test_pullr_does_not_remove() {
        let (_dir, mut handler) = handler();

        send(&mut handler, json!({"Action": "push", "Dest": "A", "Subject": "foo"}));
        send(&mut handler, json!({"Action": "push", "Dest": "A", "Subject": "bar"}));

        for _ in 0..3 {
            let reply = send(
                &mut handler,
                json!({"Action": "PullR", "Dest": "A", "Query_Subject": "f*"}),
            )
            .unwrap();
            assert_eq!(reply.payload, json!({"Subject": "foo"}));
        }

        assert_eq!(handler.store().size(), 2);
        // Only the two pushes notified the indicator
        assert_eq!(handler.indicator().counts, vec![1, 2]);
    }

    #[test]
    fn test_unknown_command() {
        let (_dir, mut handler) = handler();
        send(&mut handler, json!({"Action": "push", "Dest": "A", "Subject": "keep"}));

        let reply = send(&mut handler, json!({"Action": "delete", "Dest": "A"})).unwrap();
        assert_eq!(
            reply.payload,
            json!({"Status": "failed", "Reason": "Unknown command 'delete'"})
        );
        assert_eq!(handler.store().size(), 1);
    }

    #[test]
    fn test_malformed_requests_are_dropped() {
        let (_dir, mut handler) = handler();

        assert!(handler.handle(b"{not json").is_none());
        assert!(send(&mut handler, json!({"Action": "push"})).is_none());
        assert!(send(&mut handler, json!({"Dest": "A", "Subject": "x"})).is_none());
        assert!(matches!(
            handler.try_handle(b"42"),
            Err(RequestError::Malformed(_))
        ));

        assert_eq!(handler.store().size(), 0);
        assert!(handler.indicator().counts.is_empty());
    }

    #[test]
    fn test_no_match_is_reported_like_empty_store() {
        let (_dir, mut handler) = handler();
        send(&mut handler, json!({"Action": "push", "Dest": "A", "Author": "bob"}));

        let reply = send(
            &mut handler,
            json!({"Action": "pull", "Dest": "A", "Query_Author": "al*"}),
        )
        .unwrap();
        assert_eq!(
            reply.payload,
            json!({"Status": "failed", "Reason": "No messages available"})
        );
        assert_eq!(handler.store().size(), 1);
        // A failed pull leaves the indicator alone
        assert_eq!(handler.indicator().counts, vec![1]);
    }

    #[test]
    fn test_storage_failure_changes_nothing() {
        let (dir, mut handler) = handler();
        send(&mut handler, json!({"Action": "push", "Dest": "A", "Author": "alice"}));
        assert_eq!(handler.store().size(), 1);

        // Pull the table out from under the open store
        let conn = rusqlite::Connection::open(dir.path().join("bottle.db")).unwrap();
        conn.execute_batch("DROP TABLE messages").unwrap();

        assert!(send(&mut handler, json!({"Action": "push", "Dest": "A", "Author": "bob"})).is_none());
        assert!(send(&mut handler, json!({"Action": "pull", "Dest": "A"})).is_none());

        assert_eq!(handler.store().size(), 1);
        assert_eq!(handler.store().messages()[0].clone().into_value(), json!({"Author": "alice"}));
        assert_eq!(handler.indicator().counts, vec![1]);
    }

    #[test]
    fn test_routing_fields_not_stored() {
        let (_dir, mut handler) = handler();
        send(
            &mut handler,
            json!({"Action": "push", "Dest": 9, "Author": "a", "Query_Author": "x"}),
        );

        let stored = handler.store().messages();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].clone().into_value(), json!({"Author": "a", "Query_Author": "x"}));
    }

    #[test]
    fn test_missing_queried_field_is_skipped() {
        let (_dir, mut handler) = handler();
        send(&mut handler, json!({"Action": "push", "Dest": "A", "Author": "al"}));
        send(
            &mut handler,
            json!({"Action": "push", "Dest": "A", "Author": "al", "Age": 30}),
        );

        let reply = send(
            &mut handler,
            json!({"Action": "pull", "Dest": "A", "Query_Author": "al", "Query_Age": "3*"}),
        )
        .unwrap();
        assert_eq!(reply.payload, json!({"Author": "al", "Age": 30}));

        let remaining = handler.store().messages();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].clone().into_value(), json!({"Author": "al"}));
    }
}
