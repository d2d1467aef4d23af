use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};

use crate::Namespace;

/// An opaque position in a change stream. Only ever compared for equality or handed back to the
/// server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(Bson);

impl ResumeToken {
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }

    pub fn into_bson(self) -> Bson {
        self.0
    }
}

impl From<Bson> for ResumeToken {
    fn from(value: Bson) -> Self {
        Self(value)
    }
}

impl From<Document> for ResumeToken {
    fn from(value: Document) -> Self {
        Self(Bson::Document(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
    DropDatabase,
    Invalidate,
    /// Any operation type this client does not know about, kept as the server sent it.
    Other(String),
}

impl From<String> for OperationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "replace" => Self::Replace,
            "delete" => Self::Delete,
            "drop" => Self::Drop,
            "rename" => Self::Rename,
            "dropDatabase" => Self::DropDatabase,
            "invalidate" => Self::Invalidate,
            _ => Self::Other(value),
        }
    }
}

impl From<OperationType> for String {
    fn from(value: OperationType) -> Self {
        match value {
            OperationType::Insert => "insert".to_string(),
            OperationType::Update => "update".to_string(),
            OperationType::Replace => "replace".to_string(),
            OperationType::Delete => "delete".to_string(),
            OperationType::Drop => "drop".to_string(),
            OperationType::Rename => "rename".to_string(),
            OperationType::DropDatabase => "dropDatabase".to_string(),
            OperationType::Invalidate => "invalidate".to_string(),
            OperationType::Other(other) => other,
        }
    }
}

/// One document from a change stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStreamEvent {
    /// Where to resume from to see the events after this one.
    #[serde(rename = "_id")]
    pub id: ResumeToken,
    pub operation_type: OperationType,
    /// Missing only on invalidate events sent by old servers; the stream fills it in.
    #[serde(default)]
    pub ns: Option<Namespace>,
    /// Target of a rename.
    #[serde(default)]
    pub to: Option<Namespace>,
    #[serde(default)]
    pub document_key: Option<Document>,
    #[serde(default)]
    pub full_document: Option<Document>,
    #[serde(default)]
    pub update_description: Option<UpdateDescription>,
    #[serde(default)]
    pub cluster_time: Option<Timestamp>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
    #[serde(default)]
    pub truncated_arrays: Vec<Document>,
}
