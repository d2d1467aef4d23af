use bson::Document;

use crate::{
    change_stream::{ChangeStream, ChangeStreamTarget},
    ChangeStreamOptions, Client, MongoError, Namespace,
};

/// A handle to one collection. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Collection {
    client: Client,
    namespace: Namespace,
}

impl Collection {
    pub(crate) fn new(client: Client, db: &str, name: &str) -> Self {
        Self {
            client,
            namespace: Namespace::new(db, Some(name)),
        }
    }

    pub fn name(&self) -> &str {
        self.namespace.coll.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Watches this collection.
    pub async fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        ChangeStream::open(
            self.client.clone(),
            ChangeStreamTarget::Collection(self.namespace.clone()),
            pipeline,
            options,
        )
        .await
    }
}
