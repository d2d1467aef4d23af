use std::time::Duration;

use async_trait::async_trait;
use bson::Document;

use crate::{MongoError, ServerAddress};

/// The wire layer the client runs on.
///
/// Implementations own connection pooling, TLS, authentication and message framing. The client
/// only hands them fully formed command documents and interprets the replies.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Runs `command` against `database` on the server at `address` and returns the raw reply,
    /// including replies with `ok: 0`. Only failures to talk to the server at all should be
    /// returned as errors, and those should be [`MongoError::Network`].
    async fn run_command(
        &self,
        address: &ServerAddress,
        database: &str,
        command: Document,
    ) -> Result<Document, MongoError>;

    /// Opens a dedicated connection for heartbeats. Monitors never share connections with
    /// application operations.
    async fn connect_monitor(
        &self,
        address: &ServerAddress,
        connect_timeout: Duration,
    ) -> Result<Box<dyn MonitorConnection>, MongoError>;
}

#[async_trait]
pub trait MonitorConnection: Send {
    /// Sends `hello` and returns the raw reply.
    async fn hello(&mut self, timeout: Duration) -> Result<Document, MongoError>;
}
