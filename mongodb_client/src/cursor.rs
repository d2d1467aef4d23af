use std::{collections::VecDeque, time::Duration};

use bson::{doc, Bson, Document, Timestamp};
use tracing::instrument;

use crate::{bson_util, Client, MongoError, Namespace, ResumeToken, ServerAddress};

/// The `cursor` sub-document of an `aggregate` reply, plus the fields change streams need from
/// the reply itself.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CursorSpecification {
    pub(crate) id: i64,
    pub(crate) namespace: Namespace,
    pub(crate) first_batch: VecDeque<Document>,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl CursorSpecification {
    /// `fallback_namespace` is used when the server leaves `ns` out of the cursor.
    pub(crate) fn from_reply(
        reply: &Document,
        fallback_namespace: &Namespace,
    ) -> Result<Self, MongoError> {
        let cursor = cursor_document(reply)?;
        let namespace = match cursor.get_str("ns") {
            Ok(ns) if !ns.is_empty() => Namespace::parse(ns),
            _ => fallback_namespace.clone(),
        };
        Ok(Self {
            id: cursor_id(cursor)?,
            namespace,
            first_batch: batch(cursor, "firstBatch")?,
            post_batch_resume_token: post_batch_resume_token(cursor),
            operation_time: reply.get_timestamp("operationTime").ok(),
        })
    }
}

/// A server side cursor pinned to the server that created it.
#[derive(Debug)]
pub(crate) struct Cursor {
    client: Client,
    address: ServerAddress,
    namespace: Namespace,
    id: i64,
    buffer: VecDeque<Document>,
    post_batch_resume_token: Option<ResumeToken>,
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
}

impl Cursor {
    pub(crate) fn new(
        client: Client,
        address: ServerAddress,
        specification: CursorSpecification,
        batch_size: Option<u32>,
        max_await_time: Option<Duration>,
    ) -> Self {
        Self {
            client,
            address,
            namespace: specification.namespace,
            id: specification.id,
            buffer: specification.first_batch,
            post_batch_resume_token: specification.post_batch_resume_token,
            batch_size,
            max_await_time,
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The server closed the cursor. Buffered documents may still be pending.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.id == 0
    }

    pub(crate) fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub(crate) fn next_buffered(&mut self) -> Option<Document> {
        self.buffer.pop_front()
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.post_batch_resume_token.as_ref()
    }

    /// Fetches the next batch into the buffer.
    #[instrument(level = "debug", name = "Cursor - Get More", skip(self), fields(cursor_id = self.id))]
    pub(crate) async fn get_more(&mut self) -> Result<(), MongoError> {
        let mut command = doc! {
            "getMore": self.id,
            "collection": self.namespace.coll.clone().unwrap_or_default(),
        };
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", i64::from(batch_size));
        }
        if let Some(max_await_time) = self.max_await_time {
            command.insert("maxTimeMS", bson_util::duration_as_millis(max_await_time));
        }

        let reply = self
            .client
            .execute_on(&self.address, &self.namespace.db, command)
            .await?;

        let cursor = cursor_document(&reply)?;
        self.id = cursor_id(cursor)?;
        self.buffer.extend(batch(cursor, "nextBatch")?);
        self.post_batch_resume_token = post_batch_resume_token(cursor);
        tracing::trace!("Received {} documents", self.buffer.len());
        Ok(())
    }

    /// Closes the cursor on the server. A no-op for exhausted cursors.
    #[instrument(level = "debug", name = "Cursor - Kill", skip(self), fields(cursor_id = self.id))]
    pub(crate) async fn kill(&mut self) -> Result<(), MongoError> {
        if self.is_exhausted() {
            return Ok(());
        }
        let command = doc! {
            "killCursors": self.namespace.coll.clone().unwrap_or_default(),
            "cursors": [self.id],
        };
        self.id = 0;
        self.buffer.clear();
        self.client
            .execute_on(&self.address, &self.namespace.db, command)
            .await
            .map(|_| ())
    }
}

fn cursor_document(reply: &Document) -> Result<&Document, MongoError> {
    reply
        .get_document("cursor")
        .map_err(|_| MongoError::invalid_response("reply is missing the `cursor` document"))
}

fn cursor_id(cursor: &Document) -> Result<i64, MongoError> {
    bson_util::get_int(cursor, "id")
        .ok_or_else(|| MongoError::invalid_response("cursor is missing its `id`"))
}

fn batch(cursor: &Document, key: &str) -> Result<VecDeque<Document>, MongoError> {
    let values = match cursor.get_array(key) {
        Ok(values) => values,
        Err(_) => {
            return Err(MongoError::invalid_response(format!(
                "cursor is missing `{}`",
                key
            )))
        }
    };
    values
        .iter()
        .map(|value| match value {
            Bson::Document(document) => Ok(document.clone()),
            other => Err(MongoError::invalid_response(format!(
                "`{}` contains a non-document value: {}",
                key, other
            ))),
        })
        .collect()
}

fn post_batch_resume_token(cursor: &Document) -> Option<ResumeToken> {
    cursor
        .get("postBatchResumeToken")
        .cloned()
        .map(ResumeToken::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_reply_reads_the_cursor_and_operation_time() {
        // Arrange
        let reply = doc! {
            "cursor": {
                "id": 42_i64,
                "ns": "inventory.items",
                "firstBatch": [{ "_id": { "t": 1 } }],
                "postBatchResumeToken": { "t": 1 },
            },
            "operationTime": Timestamp { time: 10, increment: 1 },
            "ok": 1,
        };

        // Act
        let specification =
            CursorSpecification::from_reply(&reply, &Namespace::new("other", Some("coll"))).unwrap();

        // Assert
        assert_eq!(specification.id, 42);
        assert_eq!(specification.namespace, Namespace::new("inventory", Some("items")));
        assert_eq!(specification.first_batch.len(), 1);
        assert_eq!(
            specification.post_batch_resume_token,
            Some(ResumeToken::from(Bson::Document(doc! { "t": 1 })))
        );
        assert_eq!(
            specification.operation_time,
            Some(Timestamp { time: 10, increment: 1 })
        );
    }

    #[test]
    fn from_reply_falls_back_to_the_given_namespace_without_ns() {
        let reply = doc! { "cursor": { "id": 10_i64, "firstBatch": [] }, "ok": 1 };
        let fallback = Namespace::new("inventory", Some("items"));

        let specification = CursorSpecification::from_reply(&reply, &fallback).unwrap();

        assert_eq!(specification.namespace, fallback);
    }

    #[test]
    fn from_reply_rejects_replies_without_a_cursor() {
        let fallback = Namespace::new("db", Some("coll"));
        assert!(matches!(
            CursorSpecification::from_reply(&doc! { "ok": 1 }, &fallback),
            Err(MongoError::InvalidResponse { .. })
        ));
        assert!(matches!(
            CursorSpecification::from_reply(
                &doc! { "ok": 1, "cursor": { "id": 0_i64, "firstBatch": [1] } },
                &fallback
            ),
            Err(MongoError::InvalidResponse { .. })
        ));
    }
}
