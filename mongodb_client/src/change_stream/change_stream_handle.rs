use bson::{doc, Bson, Document, Timestamp};
use futures::{stream, Stream};
use tracing::instrument;

use crate::{
    cursor::{Cursor, CursorSpecification},
    ChangeStreamEvent, ChangeStreamOptions, Client, MongoError, Namespace, OperationType,
    ResumeToken, SelectionCriteria,
};

/// Servers from this wire version on accept `startAtOperationTime`.
const START_AT_OPERATION_TIME_WIRE_VERSION: i32 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeStreamState {
    /// The initial `aggregate` has not completed yet.
    Initializing,
    Open,
    /// Reopening after a resumable error.
    Resuming,
    Closed,
}

/// What a change stream watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChangeStreamTarget {
    Cluster,
    Database(String),
    Collection(Namespace),
}

impl ChangeStreamTarget {
    fn database(&self) -> &str {
        match self {
            ChangeStreamTarget::Cluster => "admin",
            ChangeStreamTarget::Database(db) => db,
            ChangeStreamTarget::Collection(namespace) => &namespace.db,
        }
    }

    /// The value of the `aggregate` field: the collection name, or 1 for database level streams.
    fn aggregate_target(&self) -> Bson {
        match self {
            ChangeStreamTarget::Collection(namespace) => {
                Bson::String(namespace.coll.clone().unwrap_or_default())
            }
            _ => Bson::Int32(1),
        }
    }

    /// Where `getMore` and `killCursors` go when the server does not name the cursor namespace.
    fn cursor_namespace(&self) -> Namespace {
        match self {
            ChangeStreamTarget::Collection(namespace) => namespace.clone(),
            _ => Namespace::new(self.database(), Some("$cmd.aggregate")),
        }
    }

    fn namespace(&self) -> Option<Namespace> {
        match self {
            ChangeStreamTarget::Cluster => None,
            ChangeStreamTarget::Database(db) => Some(Namespace::new(db, None)),
            ChangeStreamTarget::Collection(namespace) => Some(namespace.clone()),
        }
    }
}

/**
A change stream over a collection, a database or the whole deployment.

The stream tracks the resume token of the last event it returned and transparently reopens itself
once after a resumable error, using the same pipeline and options positioned after that event.
Errors from the initial `aggregate`, non-resumable errors and a failed resume close the stream
and are returned to the caller.

Dropping an open stream kills its server side cursor in the background.
*/
#[derive(Debug)]
pub struct ChangeStream {
    client: Client,
    target: ChangeStreamTarget,
    pipeline: Vec<Document>,
    options: ChangeStreamOptions,
    cursor: Option<Cursor>,
    state: ChangeStreamState,
    resume_token: Option<ResumeToken>,
    /// `operationTime` of the first `aggregate`, for resuming before any event was seen.
    initial_operation_time: Option<Timestamp>,
    last_event_was_invalidate: bool,
    max_wire_version: Option<i32>,
}

impl ChangeStream {
    #[instrument(
        level = "debug",
        name = "Change Stream - Open",
        skip(client, pipeline, options)
    )]
    pub(crate) async fn open(
        client: Client,
        target: ChangeStreamTarget,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<Self, MongoError> {
        let resume_token = options
            .start_after
            .clone()
            .or_else(|| options.resume_after.clone());
        let mut change_stream = Self {
            client,
            target,
            pipeline,
            options,
            cursor: None,
            state: ChangeStreamState::Initializing,
            resume_token,
            initial_operation_time: None,
            last_event_was_invalidate: false,
            max_wire_version: None,
        };

        let options = change_stream.options.clone();
        if let Err(e) = change_stream.run_aggregate(&options).await {
            tracing::error!("Failed to open change stream: {}", e);
            change_stream.state = ChangeStreamState::Closed;
            return Err(e);
        }
        change_stream.state = ChangeStreamState::Open;
        Ok(change_stream)
    }

    pub fn state(&self) -> ChangeStreamState {
        self.state
    }

    /// The token to resume after the last returned event, or the newest post-batch token.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        self.resume_token.as_ref()
    }

    /// Whether more events may still arrive.
    pub fn is_alive(&self) -> bool {
        if self.state == ChangeStreamState::Closed {
            return false;
        }
        match &self.cursor {
            Some(cursor) => !cursor.is_exhausted() || cursor.has_buffered(),
            None => false,
        }
    }

    /// Waits for the next event. Returns `None` once the stream can produce no more events, for
    /// example after an invalidate.
    pub async fn next(&mut self) -> Result<Option<ChangeStreamEvent>, MongoError> {
        loop {
            if !self.is_alive() {
                return Ok(None);
            }
            if let Some(event) = self.next_if_any().await? {
                return Ok(Some(event));
            }
        }
    }

    /// Returns a buffered event, or asks the server for more at most once. `None` means the
    /// server had nothing new yet.
    #[instrument(level = "debug", name = "Change Stream - Next If Any", skip(self))]
    pub async fn next_if_any(&mut self) -> Result<Option<ChangeStreamEvent>, MongoError> {
        if let Some(document) = self.buffered() {
            return self.process(document).await.map(Some);
        }
        if !self.is_alive() {
            self.state = ChangeStreamState::Closed;
            return Ok(None);
        }

        if let Err(e) = self.get_more().await {
            if e.is_resumable(self.max_wire_version) {
                self.resume(e).await?;
            } else {
                tracing::error!("Change stream failed with a non-resumable error: {}", e);
                return self.close_with(e).await;
            }
        }

        match self.buffered() {
            Some(document) => self.process(document).await.map(Some),
            None => {
                self.track_post_batch_resume_token();
                Ok(None)
            }
        }
    }

    /// Closes the server side cursor.
    pub async fn kill(mut self) -> Result<(), MongoError> {
        self.state = ChangeStreamState::Closed;
        match self.cursor.take() {
            Some(mut cursor) => cursor.kill().await,
            None => Ok(()),
        }
    }

    /// Turns the stream into a [`Stream`]. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<ChangeStreamEvent, MongoError>> + Send {
        stream::unfold(self, |mut change_stream| async move {
            match change_stream.next().await {
                Ok(Some(event)) => Some((Ok(event), change_stream)),
                Ok(None) => None,
                Err(e) => Some((Err(e), change_stream)),
            }
        })
    }

    fn buffered(&mut self) -> Option<Document> {
        if self.state == ChangeStreamState::Closed {
            return None;
        }
        self.cursor.as_mut().and_then(Cursor::next_buffered)
    }

    async fn get_more(&mut self) -> Result<(), MongoError> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.get_more().await,
            None => Err(MongoError::invalid_response("change stream has no cursor")),
        }
    }

    /// Runs the `aggregate` that (re)opens the stream and pins the new cursor to the server that
    /// answered it.
    async fn run_aggregate(&mut self, options: &ChangeStreamOptions) -> Result<(), MongoError> {
        let mut pipeline = vec![Bson::Document(options.change_stream_stage(
            self.target == ChangeStreamTarget::Cluster,
        ))];
        pipeline.extend(self.pipeline.iter().cloned().map(Bson::Document));

        let mut cursor_options = Document::new();
        if let Some(batch_size) = options.batch_size {
            cursor_options.insert("batchSize", i64::from(batch_size));
        }
        let command = doc! {
            "aggregate": self.target.aggregate_target(),
            "pipeline": pipeline,
            "cursor": cursor_options,
        };
        let criteria = SelectionCriteria::ReadPreference(options.read_preference.unwrap_or_default());

        let (reply, address) = self
            .client
            .execute_with_selection(self.target.database(), command, &criteria)
            .await?;
        let specification =
            CursorSpecification::from_reply(&reply, &self.target.cursor_namespace())?;
        self.max_wire_version = self.client.max_wire_version(&address);

        let has_start_position = self.options.resume_after.is_some()
            || self.options.start_after.is_some()
            || self.options.start_at_operation_time.is_some();
        if self.initial_operation_time.is_none()
            && !has_start_position
            && specification.post_batch_resume_token.is_none()
        {
            self.initial_operation_time = specification.operation_time;
        }

        tracing::debug!(
            address = %address,
            cursor_id = specification.id,
            "Change stream cursor opened"
        );
        self.cursor = Some(Cursor::new(
            self.client.clone(),
            address,
            specification,
            options.batch_size,
            options.max_await_time,
        ));
        self.track_post_batch_resume_token();
        Ok(())
    }

    /// Adopts the post-batch resume token of a batch that returned no documents.
    fn track_post_batch_resume_token(&mut self) {
        if let Some(cursor) = &self.cursor {
            if !cursor.has_buffered() {
                if let Some(token) = cursor.post_batch_resume_token() {
                    self.resume_token = Some(token.clone());
                }
            }
        }
    }

    /// Kills the old cursor (ignoring failures) and runs the `aggregate` again positioned after
    /// the last tracked token. A failure here closes the stream.
    #[instrument(level = "debug", name = "Change Stream - Resume", skip(self))]
    async fn resume(&mut self, error: MongoError) -> Result<(), MongoError> {
        tracing::info!("Resuming change stream after error: {}", error);
        self.state = ChangeStreamState::Resuming;

        if let Some(mut cursor) = self.cursor.take() {
            tracing::debug!(address = %cursor.address(), "Killing the failed cursor");
            if let Err(e) = cursor.kill().await {
                tracing::debug!("Ignoring failure to kill the old cursor: {}", e);
            }
        }

        let options = self.resume_options();
        match self.run_aggregate(&options).await {
            Ok(()) => {
                self.state = ChangeStreamState::Open;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to resume change stream: {}", e);
                self.state = ChangeStreamState::Closed;
                Err(e)
            }
        }
    }

    /// The options the stream was opened with, positioned at the tracked token.
    fn resume_options(&self) -> ChangeStreamOptions {
        let mut options = self.options.clone().without_start_position();
        match &self.resume_token {
            Some(token) => {
                let still_at_start_after = self.options.start_after.as_ref() == Some(token);
                if self.last_event_was_invalidate || still_at_start_after {
                    options.start_after = Some(token.clone());
                } else {
                    options.resume_after = Some(token.clone());
                }
            }
            None => {
                let supports_operation_time = self
                    .max_wire_version
                    .map(|version| version >= START_AT_OPERATION_TIME_WIRE_VERSION)
                    .unwrap_or(false);
                if supports_operation_time {
                    options.start_at_operation_time = self
                        .options
                        .start_at_operation_time
                        .or(self.initial_operation_time);
                }
            }
        }
        options
    }

    async fn process(&mut self, document: Document) -> Result<ChangeStreamEvent, MongoError> {
        let token = match document.get("_id") {
            Some(token) => ResumeToken::from(token.clone()),
            None => {
                tracing::error!("Change stream document has no resume token");
                return self.close_with(MongoError::MissingResumeToken).await;
            }
        };

        let mut event: ChangeStreamEvent = match bson::from_document(document) {
            Ok(event) => event,
            Err(e) => {
                let error =
                    MongoError::invalid_response(format!("malformed change stream event: {}", e));
                return self.close_with(error).await;
            }
        };

        self.resume_token = Some(token);
        self.last_event_was_invalidate = event.operation_type == OperationType::Invalidate;
        if self.last_event_was_invalidate {
            if event.ns.is_none() {
                event.ns = self.target.namespace();
            }
            // Nothing can follow an invalidate.
            tracing::debug!("Change stream invalidated");
            if let Some(mut cursor) = self.cursor.take() {
                if let Err(e) = cursor.kill().await {
                    tracing::debug!("Ignoring failure to kill the invalidated cursor: {}", e);
                }
            }
            self.state = ChangeStreamState::Closed;
        }
        Ok(event)
    }

    async fn close_with<T>(&mut self, error: MongoError) -> Result<T, MongoError> {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.kill().await {
                tracing::debug!("Ignoring failure to kill the cursor: {}", e);
            }
        }
        self.state = ChangeStreamState::Closed;
        Err(error)
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        let mut cursor = match self.cursor.take() {
            Some(cursor) if !cursor.is_exhausted() => cursor,
            _ => return,
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = cursor.kill().await {
                    tracing::debug!("Failed to kill dropped change stream cursor: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bson::doc;

    use super::*;
    use crate::{
        test_util::{address, hello_standalone, init_tracing, MockTransport},
        ClientBuilder, CommandError, FullDocumentType, RESUMABLE_CHANGE_STREAM_ERROR,
    };

    fn client(transport: &MockTransport) -> Client {
        init_tracing();
        transport.set_hello_reply(&address("a:27017"), hello_standalone());
        ClientBuilder::new()
            .set_hosts(&["a:27017"])
            .set_transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    fn token(data: &str) -> ResumeToken {
        ResumeToken::from(doc! { "_data": data })
    }

    fn insert_event(data: &str) -> Document {
        doc! {
            "_id": { "_data": data },
            "operationType": "insert",
            "ns": { "db": "db", "coll": "coll" },
            "documentKey": { "_id": 1 },
            "fullDocument": { "_id": 1, "qty": 5 },
        }
    }

    fn aggregate_reply(id: i64, first_batch: Vec<Document>) -> Document {
        doc! {
            "cursor": { "id": id, "ns": "db.coll", "firstBatch": first_batch },
            "operationTime": Timestamp { time: 100, increment: 1 },
            "ok": 1,
        }
    }

    fn get_more_reply(id: i64, next_batch: Vec<Document>, post_batch: Option<&str>) -> Document {
        let mut cursor = doc! { "id": id, "ns": "db.coll", "nextBatch": next_batch };
        if let Some(data) = post_batch {
            cursor.insert("postBatchResumeToken", doc! { "_data": data });
        }
        doc! { "cursor": cursor, "ok": 1 }
    }

    fn resumable_error() -> MongoError {
        MongoError::from(
            CommandError::new(43, "CursorNotFound", "cursor not found")
                .with_label(RESUMABLE_CHANGE_STREAM_ERROR),
        )
    }

    async fn watch_collection(client: &Client, options: ChangeStreamOptions) -> ChangeStream {
        client
            .database("db")
            .collection("coll")
            .watch(vec![doc! { "$match": { "operationType": "insert" } }], options)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn resumable_errors_reopen_the_stream_once_with_the_same_pipeline() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![insert_event("1")]));
        transport.push_error("getMore", resumable_error());
        transport.push_reply("aggregate", aggregate_reply(11, vec![insert_event("2")]));
        let client = client(&transport);
        let options = ChangeStreamOptions::default()
            .set_full_document(FullDocumentType::UpdateLookup)
            .set_batch_size(5);
        let mut stream = watch_collection(&client, options).await;

        // Act
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();

        // Assert
        assert_eq!(first.id, token("1"));
        assert_eq!(second.id, token("2"));
        assert_eq!(stream.state(), ChangeStreamState::Open);

        let aggregates = transport.commands_named("aggregate");
        assert_eq!(aggregates.len(), 2);
        assert_eq!(
            aggregates[1].2,
            doc! {
                "aggregate": "coll",
                "pipeline": [
                    { "$changeStream": { "fullDocument": "updateLookup", "resumeAfter": { "_data": "1" } } },
                    { "$match": { "operationType": "insert" } },
                ],
                "cursor": { "batchSize": 5_i64 },
            }
        );
        let kills = transport.commands_named("killCursors");
        assert_eq!(kills[0].2, doc! { "killCursors": "coll", "cursors": [10_i64] });
    }

    #[tokio::test(start_paused = true)]
    async fn non_resumable_errors_are_returned_and_close_the_stream() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![]));
        transport.push_error(
            "getMore",
            MongoError::from(
                CommandError::new(11601, "Interrupted", "interrupted")
                    .with_label(RESUMABLE_CHANGE_STREAM_ERROR),
            ),
        );
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        // Act
        let result = stream.next().await;

        // Assert
        assert_eq!(result.unwrap_err().code(), Some(11601));
        assert_eq!(stream.state(), ChangeStreamState::Closed);
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(transport.commands_named("aggregate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_resume_is_returned_without_another_attempt() {
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![]));
        transport.push_error("getMore", resumable_error());
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        let result = stream.next_if_any().await;

        assert!(result.is_err());
        assert_eq!(stream.state(), ChangeStreamState::Closed);
        assert!(!stream.is_alive());
        assert_eq!(transport.commands_named("aggregate").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_from_the_initial_aggregate_are_never_resumed() {
        let transport = MockTransport::new();
        transport.push_error("aggregate", MongoError::network(Some(address("a:27017")), "reset"));
        let client = client(&transport);

        let result = client
            .database("db")
            .collection("coll")
            .watch(vec![], ChangeStreamOptions::default())
            .await;

        assert!(result.unwrap_err().is_network_error());
        assert_eq!(transport.commands_named("aggregate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_resume_token_follows_events_and_empty_batches() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply(
            "aggregate",
            doc! {
                "cursor": {
                    "id": 10_i64,
                    "ns": "db.coll",
                    "firstBatch": [],
                    "postBatchResumeToken": { "_data": "0" },
                },
                "ok": 1,
            },
        );
        transport.push_reply(
            "getMore",
            get_more_reply(10, vec![insert_event("1"), insert_event("2")], Some("2a")),
        );
        transport.push_reply("getMore", get_more_reply(10, vec![], Some("3")));
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;
        let mut tokens = vec![stream.resume_token().cloned()];

        // Act
        for _ in 0..3 {
            stream.next_if_any().await.unwrap();
            tokens.push(stream.resume_token().cloned());
        }

        // Assert
        assert_eq!(
            tokens,
            vec![
                Some(token("0")),
                Some(token("1")),
                Some(token("2")),
                Some(token("3")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_events_carry_the_collection_namespace() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply(
            "aggregate",
            aggregate_reply(
                10,
                vec![doc! { "_id": { "_data": "9" }, "operationType": "invalidate" }],
            ),
        );
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        // Act
        let event = stream.next().await.unwrap().unwrap();

        // Assert
        assert_eq!(event.operation_type, OperationType::Invalidate);
        assert_eq!(event.ns, Some(Namespace::new("db", Some("coll"))));
        assert!(!stream.is_alive());
        assert!(stream.next().await.unwrap().is_none());
        assert_eq!(transport.commands_named("killCursors").len(), 1);
        assert_eq!(stream.resume_options().start_after, Some(token("9")));
        assert_eq!(stream.resume_options().resume_after, None);
    }

    #[tokio::test(start_paused = true)]
    async fn start_after_is_kept_until_a_newer_token_is_seen() {
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![]));
        let client = client(&transport);
        let options = ChangeStreamOptions::default().set_start_after(token("5"));

        let stream = watch_collection(&client, options).await;

        assert_eq!(stream.resume_token(), Some(&token("5")));
        assert_eq!(stream.resume_options().start_after, Some(token("5")));
        let aggregate = &transport.commands_named("aggregate")[0].2;
        let stage = aggregate.get_array("pipeline").unwrap()[0].as_document().unwrap();
        assert_eq!(
            stage,
            &doc! { "$changeStream": { "startAfter": { "_data": "5" } } }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn documents_without_a_resume_token_close_the_stream() {
        let transport = MockTransport::new();
        transport.push_reply(
            "aggregate",
            aggregate_reply(10, vec![doc! { "operationType": "insert" }]),
        );
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        let result = stream.next().await;

        assert!(matches!(result, Err(MongoError::MissingResumeToken)));
        assert_eq!(stream.state(), ChangeStreamState::Closed);
        assert_eq!(transport.commands_named("aggregate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_to_kill_the_old_cursor_are_swallowed() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![insert_event("1")]));
        transport.push_error("getMore", resumable_error());
        transport.push_reply(
            "killCursors",
            doc! { "ok": 0, "code": 43, "codeName": "CursorNotFound", "errmsg": "gone" },
        );
        transport.push_reply("aggregate", aggregate_reply(11, vec![insert_event("2")]));
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        // Act
        stream.next().await.unwrap();
        let event = stream.next().await;

        // Assert
        assert_eq!(event.unwrap().unwrap().id, token("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn resuming_before_any_token_uses_the_initial_operation_time() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![]));
        transport.push_error("getMore", resumable_error());
        transport.push_reply("aggregate", aggregate_reply(11, vec![]));
        let client = client(&transport);
        let mut stream = client
            .database("db")
            .watch(vec![], ChangeStreamOptions::default())
            .await
            .unwrap();

        // Act
        let event = stream.next_if_any().await;

        // Assert
        assert!(event.unwrap().is_none());
        let aggregates = transport.commands_named("aggregate");
        assert_eq!(aggregates[1].1, "db");
        assert_eq!(
            aggregates[1].2,
            doc! {
                "aggregate": 1,
                "pipeline": [
                    { "$changeStream": { "startAtOperationTime": Timestamp { time: 100, increment: 1 } } },
                ],
                "cursor": {},
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn get_more_targets_the_watched_collection_when_the_reply_omits_ns() {
        // Arrange
        let transport = MockTransport::new();
        transport.push_reply(
            "aggregate",
            doc! { "cursor": { "id": 10_i64, "firstBatch": [] }, "ok": 1 },
        );
        transport.push_reply("getMore", get_more_reply(10, vec![insert_event("1")], None));
        let client = client(&transport);
        let mut stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        // Act
        let event = stream.next_if_any().await.unwrap();

        // Assert
        assert_eq!(event.unwrap().id, token("1"));
        let get_mores = transport.commands_named("getMore");
        assert_eq!(get_mores[0].1, "db");
        assert_eq!(get_mores[0].2.get_str("collection").unwrap(), "coll");
    }

    #[tokio::test(start_paused = true)]
    async fn cluster_streams_run_against_admin_for_all_changes() {
        let transport = MockTransport::new();
        transport.push_reply("aggregate", aggregate_reply(10, vec![]));
        let client = client(&transport);

        client.watch(vec![], ChangeStreamOptions::default()).await.unwrap();

        let aggregate = &transport.commands_named("aggregate")[0];
        assert_eq!(aggregate.1, "admin");
        assert_eq!(
            aggregate.2.get_array("pipeline").unwrap()[0],
            Bson::Document(doc! { "$changeStream": { "allChangesForCluster": true } })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn into_stream_yields_events_in_order() {
        use futures::StreamExt;

        let transport = MockTransport::new();
        transport.push_reply(
            "aggregate",
            aggregate_reply(0, vec![insert_event("1"), insert_event("2")]),
        );
        let client = client(&transport);
        let stream = watch_collection(&client, ChangeStreamOptions::default()).await;

        let events: Vec<_> = stream.into_stream().collect().await;

        let ids: Vec<_> = events.into_iter().map(|event| event.unwrap().id).collect();
        assert_eq!(ids, vec![token("1"), token("2")]);
    }
}
