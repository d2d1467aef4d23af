use std::time::Duration;

use bson::{doc, Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};

use crate::{ReadPreference, ResumeToken};

/// What `fullDocument` contains for update events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FullDocumentType {
    #[default]
    Default,
    UpdateLookup,
    WhenAvailable,
    Required,
}

impl FullDocumentType {
    fn as_str(&self) -> &'static str {
        match self {
            FullDocumentType::Default => "default",
            FullDocumentType::UpdateLookup => "updateLookup",
            FullDocumentType::WhenAvailable => "whenAvailable",
            FullDocumentType::Required => "required",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeStreamOptions {
    pub full_document: Option<FullDocumentType>,
    pub resume_after: Option<ResumeToken>,
    /// Like `resume_after`, but also accepted after an invalidate event.
    pub start_after: Option<ResumeToken>,
    pub start_at_operation_time: Option<Timestamp>,
    pub batch_size: Option<u32>,
    /// How long each `getMore` waits for new events on the server.
    pub max_await_time: Option<Duration>,
    /// Where the stream is opened. Defaults to the primary.
    pub read_preference: Option<ReadPreference>,
}

impl ChangeStreamOptions {
    pub fn set_full_document(mut self, full_document: FullDocumentType) -> Self {
        self.full_document = Some(full_document);
        self
    }

    pub fn set_resume_after(mut self, token: ResumeToken) -> Self {
        self.resume_after = Some(token);
        self
    }

    pub fn set_start_after(mut self, token: ResumeToken) -> Self {
        self.start_after = Some(token);
        self
    }

    pub fn set_start_at_operation_time(mut self, operation_time: Timestamp) -> Self {
        self.start_at_operation_time = Some(operation_time);
        self
    }

    pub fn set_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn set_max_await_time(mut self, max_await_time: Duration) -> Self {
        self.max_await_time = Some(max_await_time);
        self
    }

    pub fn set_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = Some(read_preference);
        self
    }

    /// The `$changeStream` stage these options describe.
    pub(crate) fn change_stream_stage(&self, all_changes_for_cluster: bool) -> Document {
        let mut stage = Document::new();
        if let Some(full_document) = self.full_document {
            stage.insert("fullDocument", full_document.as_str());
        }
        if let Some(token) = &self.resume_after {
            stage.insert("resumeAfter", token.as_bson().clone());
        }
        if let Some(token) = &self.start_after {
            stage.insert("startAfter", token.as_bson().clone());
        }
        if let Some(operation_time) = self.start_at_operation_time {
            stage.insert("startAtOperationTime", Bson::Timestamp(operation_time));
        }
        if all_changes_for_cluster {
            stage.insert("allChangesForCluster", true);
        }
        doc! { "$changeStream": stage }
    }

    /// Removes every start position.
    pub(crate) fn without_start_position(mut self) -> Self {
        self.resume_after = None;
        self.start_after = None;
        self.start_at_operation_time = None;
        self
    }
}
