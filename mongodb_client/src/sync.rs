/*!
Blocking wrappers around the async client.

A [`Client`] owns its own multi-threaded tokio runtime, which keeps the monitors running in the
background. Every blocking call drives the matching async operation to completion on that
runtime, so the wrappers must not be used from inside another async runtime.
*/

use std::sync::Arc;

use anyhow::Context;
use bson::Document;
use tokio::runtime::Runtime;

use crate::{
    ChangeStreamEvent, ChangeStreamOptions, ChangeStreamState, ClientBuilder, ClientError,
    MongoError, Namespace, ResumeToken, SelectionCriteria, ServerAddress, TopologyDescription,
};

#[derive(Clone, Debug)]
pub struct Client {
    async_client: crate::Client,
    runtime: Arc<Runtime>,
}

impl Client {
    /// Starts a runtime and builds the async client on it.
    pub fn with_builder(builder: ClientBuilder) -> Result<Self, ClientError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mongodb-client")
            .build()
            .context("Failed to start the client runtime")?;

        let async_client = {
            let _guard = runtime.enter();
            builder.build()?
        };

        Ok(Self {
            async_client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn database(&self, name: &str) -> Database {
        Database {
            async_database: self.async_client.database(name),
            runtime: self.runtime.clone(),
        }
    }

    pub fn topology_description(&self) -> Arc<TopologyDescription> {
        self.async_client.topology_description()
    }

    pub fn select_server(&self, criteria: &SelectionCriteria) -> Result<ServerAddress, MongoError> {
        self.runtime
            .block_on(self.async_client.select_server(criteria))
    }

    pub fn run_command(
        &self,
        database: &str,
        command: Document,
        criteria: Option<SelectionCriteria>,
    ) -> Result<Document, MongoError> {
        self.runtime
            .block_on(self.async_client.run_command(database, command, criteria))
    }

    pub fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        let stream = self
            .runtime
            .block_on(self.async_client.watch(pipeline, options))?;
        Ok(ChangeStream::new(stream, self.runtime.clone()))
    }

    pub fn shutdown(&self) {
        self.runtime.block_on(self.async_client.shutdown());
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    async_database: crate::Database,
    runtime: Arc<Runtime>,
}

impl Database {
    pub fn name(&self) -> &str {
        self.async_database.name()
    }

    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            async_collection: self.async_database.collection(name),
            runtime: self.runtime.clone(),
        }
    }

    pub fn run_command(
        &self,
        command: Document,
        criteria: Option<SelectionCriteria>,
    ) -> Result<Document, MongoError> {
        self.runtime
            .block_on(self.async_database.run_command(command, criteria))
    }

    pub fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        let stream = self
            .runtime
            .block_on(self.async_database.watch(pipeline, options))?;
        Ok(ChangeStream::new(stream, self.runtime.clone()))
    }
}

#[derive(Clone, Debug)]
pub struct Collection {
    async_collection: crate::Collection,
    runtime: Arc<Runtime>,
}

impl Collection {
    pub fn name(&self) -> &str {
        self.async_collection.name()
    }

    pub fn namespace(&self) -> &Namespace {
        self.async_collection.namespace()
    }

    pub fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        let stream = self
            .runtime
            .block_on(self.async_collection.watch(pipeline, options))?;
        Ok(ChangeStream::new(stream, self.runtime.clone()))
    }
}

/// A blocking change stream. Iterating blocks until the next event arrives and ends when the
/// stream can produce no more events.
#[derive(Debug)]
pub struct ChangeStream {
    // Only `None` after `kill` or while dropping.
    async_stream: Option<crate::ChangeStream>,
    runtime: Arc<Runtime>,
}

impl ChangeStream {
    fn new(async_stream: crate::ChangeStream, runtime: Arc<Runtime>) -> Self {
        Self {
            async_stream: Some(async_stream),
            runtime,
        }
    }

    /// Returns a buffered event, or asks the server for more at most once.
    pub fn next_if_any(&mut self) -> Result<Option<ChangeStreamEvent>, MongoError> {
        match self.async_stream.as_mut() {
            Some(stream) => self.runtime.block_on(stream.next_if_any()),
            None => Ok(None),
        }
    }

    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.async_stream
            .as_ref()
            .and_then(|stream| stream.resume_token().cloned())
    }

    pub fn is_alive(&self) -> bool {
        self.async_stream
            .as_ref()
            .map(crate::ChangeStream::is_alive)
            .unwrap_or(false)
    }

    pub fn state(&self) -> ChangeStreamState {
        self.async_stream
            .as_ref()
            .map(crate::ChangeStream::state)
            .unwrap_or(ChangeStreamState::Closed)
    }

    /// Closes the server side cursor and waits for the server to acknowledge it.
    pub fn kill(mut self) -> Result<(), MongoError> {
        match self.async_stream.take() {
            Some(stream) => self.runtime.block_on(stream.kill()),
            None => Ok(()),
        }
    }
}

impl Iterator for ChangeStream {
    type Item = Result<ChangeStreamEvent, MongoError>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.async_stream.as_mut()?;
        self.runtime.block_on(stream.next()).transpose()
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        // The async stream kills its cursor on the current runtime.
        let _guard = self.runtime.enter();
        self.async_stream.take();
    }
}
