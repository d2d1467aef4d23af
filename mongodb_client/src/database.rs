use bson::Document;

use crate::{
    change_stream::{ChangeStream, ChangeStreamTarget},
    ChangeStreamOptions, Client, Collection, MongoError, SelectionCriteria,
};

/// A handle to one database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str) -> Self {
        Self {
            client,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.client.clone(), &self.name, name)
    }

    /// See [`Client::run_command`].
    pub async fn run_command(
        &self,
        command: Document,
        criteria: Option<SelectionCriteria>,
    ) -> Result<Document, MongoError> {
        self.client.run_command(&self.name, command, criteria).await
    }

    /// Watches every collection in this database.
    pub async fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        ChangeStream::open(
            self.client.clone(),
            ChangeStreamTarget::Database(self.name.clone()),
            pipeline,
            options,
        )
        .await
    }
}
