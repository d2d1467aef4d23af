use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
};

use bson::Document;
use tokio::{sync::broadcast, time::Instant};
use tracing::instrument;

use crate::{
    bson_util,
    change_stream::{ChangeStream, ChangeStreamTarget},
    events::EventBus,
    selection::ServerSelector,
    topology::Topology,
    ChangeStreamOptions, ClientBuilder, ClientOptions, CommandError, CommandEvent, Database,
    Event, EventHandler, MongoError, SelectionCriteria, ServerAddress, TopologyDescription,
    Transport,
};

/**
This is a handle to a client.

Cloning this handle is very cheap and shares the same topology, monitors and event handlers.
When the last handle (including the ones held by databases, collections and change streams)
goes out of scope, the topology is closed and its monitors stop.

Use [`Client::shutdown`] to close the topology explicitly and wait for the closing events.
*/
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: ClientOptions,
    topology: Topology,
    transport: Arc<dyn Transport>,
    events: EventBus,
    selector: ServerSelector,
    next_request_id: AtomicI32,
    shut_down: AtomicBool,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    // Only the builder creates clients, after validating the options.
    pub(crate) fn new(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        event_handlers: Vec<Arc<dyn EventHandler>>,
    ) -> Self {
        let events = EventBus::new(event_handlers);
        let topology = Topology::new(options.topology_options(), transport.clone(), events.clone());
        let selector = ServerSelector {
            timeout: options.server_selection_timeout,
            local_threshold: options.local_threshold,
        };

        Self {
            inner: Arc::new(ClientInner {
                options,
                topology,
                transport,
                events,
                selector,
                next_request_id: AtomicI32::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// The latest topology snapshot. Never blocks.
    pub fn topology_description(&self) -> Arc<TopologyDescription> {
        self.inner.topology.description()
    }

    /// Receives every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Selects a server matching `criteria`, waiting up to the server selection timeout for one
    /// to become available.
    pub async fn select_server(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<ServerAddress, MongoError> {
        self.ensure_open()?;
        self.inner
            .selector
            .select(&self.inner.topology, criteria)
            .await
    }

    /// Runs `command` against `database` on a server chosen by `criteria` (the primary when
    /// `None`) and returns the reply. Replies with `ok: 0` are returned as
    /// [`MongoError::Command`].
    #[instrument(level = "debug", name = "Client - Run Command", skip(self, command))]
    pub async fn run_command(
        &self,
        database: &str,
        command: Document,
        criteria: Option<SelectionCriteria>,
    ) -> Result<Document, MongoError> {
        let criteria = criteria.unwrap_or_default();
        self.execute_with_selection(database, command, &criteria)
            .await
            .map(|(reply, _)| reply)
    }

    /// Watches every database in the deployment.
    pub async fn watch(
        &self,
        pipeline: Vec<Document>,
        options: ChangeStreamOptions,
    ) -> Result<ChangeStream, MongoError> {
        ChangeStream::open(self.clone(), ChangeStreamTarget::Cluster, pipeline, options).await
    }

    /// Stops every monitor and emits `ServerClosed` for each server followed by
    /// `TopologyClosed`. Operations started afterwards fail with [`MongoError::Shutdown`].
    #[instrument(level = "debug", name = "Client - Shutdown", skip(self))]
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.topology.shutdown().await;
    }

    pub(crate) async fn execute_with_selection(
        &self,
        database: &str,
        command: Document,
        criteria: &SelectionCriteria,
    ) -> Result<(Document, ServerAddress), MongoError> {
        let address = self.select_server(criteria).await?;
        let reply = self.execute_on(&address, database, command).await?;
        Ok((reply, address))
    }

    /// Runs a command on a specific server, emitting command events. Network and state change
    /// errors are reported to the topology.
    #[instrument(
        level = "debug",
        name = "Client - Execute Command",
        skip(self, command),
        fields(command_name)
    )]
    pub(crate) async fn execute_on(
        &self,
        address: &ServerAddress,
        database: &str,
        command: Document,
    ) -> Result<Document, MongoError> {
        self.ensure_open()?;

        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        let command_name = bson_util::command_name(&command);
        tracing::Span::current().record("command_name", command_name.as_str());

        self.inner.events.emit(Event::Command(CommandEvent::Started {
            request_id,
            address: address.clone(),
            database: database.to_string(),
            command_name: command_name.clone(),
            command: command.clone(),
        }));

        let started = Instant::now();
        let result = match self
            .inner
            .transport
            .run_command(address, database, command)
            .await
        {
            Ok(reply) => match CommandError::from_reply(&reply) {
                Some(error) => Err(MongoError::from(error)),
                None => Ok(reply),
            },
            Err(e) => Err(e),
        };
        let duration = started.elapsed();

        match &result {
            Ok(reply) => {
                tracing::trace!("Command succeeded in {:?}", duration);
                self.inner.events.emit(Event::Command(CommandEvent::Succeeded {
                    request_id,
                    address: address.clone(),
                    command_name,
                    duration,
                    reply: reply.clone(),
                }));
            }
            Err(e) => {
                tracing::debug!("Command failed: {}", e);
                self.inner.events.emit(Event::Command(CommandEvent::Failed {
                    request_id,
                    address: address.clone(),
                    command_name,
                    duration,
                    failure: e.clone(),
                }));
                if e.is_network_error() || e.is_state_change_error() {
                    self.inner
                        .topology
                        .handle_application_error(address.clone(), e.clone())
                        .await;
                }
            }
        }

        result
    }

    /// Max wire version of a server as of the latest topology snapshot.
    pub(crate) fn max_wire_version(&self, address: &ServerAddress) -> Option<i32> {
        self.topology_description()
            .server(address)
            .filter(|server| server.is_available())
            .map(|server| server.max_wire_version)
    }

    fn ensure_open(&self) -> Result<(), MongoError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(MongoError::Shutdown);
        }
        Ok(())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.inner.options)
            .field("topology", &self.inner.topology)
            .field("events", &self.inner.events)
            .finish()
    }
}
