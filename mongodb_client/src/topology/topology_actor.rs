use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, watch};
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    events::EventBus, monitor::Monitor, MongoError, ServerAddress, ServerDescription,
    TopologyDescription, Transport,
};

use super::{SdamEngine, TopologyChanges, TopologyMessage, TopologyOptions};

pub(crate) struct TopologyActor {
    engine: SdamEngine,
    monitors: HashMap<ServerAddress, Monitor>,
    options: TopologyOptions,
    transport: Arc<dyn Transport>,
    events: EventBus,
    receiver: mpsc::Receiver<TopologyMessage>,
    /// Allows the actor to receive messages from its monitors.
    receiver_internal: mpsc::Receiver<TopologyMessage>,
    /// Handed to every monitor so results come back to this actor.
    sender_internal: mpsc::Sender<TopologyMessage>,
    closed: bool,
}

impl TopologyActor {
    /// Creates the actor and opens the topology: the opening events are emitted and the monitors
    /// for the seeds are started before this returns.
    pub(crate) fn new(
        receiver: mpsc::Receiver<TopologyMessage>,
        options: TopologyOptions,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> (Self, watch::Receiver<Arc<TopologyDescription>>) {
        let (tx, rx) = mpsc::channel(64);
        let (engine, watcher) = SdamEngine::new(
            TopologyDescription::new(
                Uuid::new_v4(),
                options.initial_type,
                options.set_name.clone(),
            ),
            events.clone(),
        );

        let mut actor = Self {
            engine,
            monitors: HashMap::new(),
            options,
            transport,
            events,
            receiver,
            receiver_internal: rx,
            sender_internal: tx,
            closed: false,
        };
        actor.open();

        (actor, watcher)
    }

    fn open(&mut self) {
        let seeds = self.options.seeds.clone();
        let changes = self.engine.open(&seeds);
        tracing::info!(
            topology_id = %self.engine.description().topology_id(),
            "Opened topology with seeds {:?}",
            &seeds
        );

        if self.options.is_load_balanced() {
            // Load balancers are never monitored; they are known from the start.
            for seed in seeds {
                self.engine
                    .update_server(ServerDescription::load_balancer(seed));
            }
            return;
        }
        self.sync_monitors(changes);
    }

    /// Message handler for the TopologyActor
    #[instrument(
        level = "debug",
        name = "Topology Actor - Handle Message",
        skip(self),
        fields(correlation_id)
    )]
    async fn handle_message(&mut self, msg: TopologyMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            TopologyMessage::UpdateServer(description) => {
                if let Some(changes) = self.engine.update_server(description) {
                    self.sync_monitors(changes);
                }
            }
            TopologyMessage::HandleApplicationError { address, error } => {
                self.handle_application_error(address, error);
            }
            TopologyMessage::RequestImmediateCheck => {
                tracing::trace!("Requesting an immediate check of every server");
                for monitor in self.monitors.values() {
                    monitor.request_check();
                }
            }
            TopologyMessage::Shutdown { respond_to } => {
                self.close();
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_application_error(&mut self, address: ServerAddress, error: MongoError) {
        if let Some(changes) = self.engine.handle_application_error(&address, &error) {
            self.sync_monitors(changes);
            // A server that changed role will tell us what it is now.
            if error.is_state_change_error() {
                if let Some(monitor) = self.monitors.get(&address) {
                    monitor.request_check();
                }
            }
        }
    }

    /// Starts monitors for servers that joined the topology and stops the ones of servers that
    /// left it.
    fn sync_monitors(&mut self, changes: TopologyChanges) {
        for address in changes.removed {
            if let Some(monitor) = self.monitors.remove(&address) {
                tracing::debug!(address = %address, "Stopping monitor");
                monitor.stop();
            }
        }

        if self.options.is_load_balanced() {
            return;
        }

        for address in changes.added {
            tracing::debug!(address = %address, "Starting monitor");
            let monitor = Monitor::start(
                address.clone(),
                self.options.heartbeat,
                self.transport.clone(),
                self.sender_internal.clone(),
                self.events.clone(),
            );
            self.monitors.insert(address, monitor);
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for (_, monitor) in self.monitors.drain() {
            monitor.stop();
        }
        self.engine.close();
        self.closed = true;
        tracing::info!("Topology closed");
    }
}

#[instrument(level = "debug", name = "Running Topology Actor", skip(actor))]
pub(crate) async fn run_topology_actor(mut actor: TopologyActor) {
    loop {
        tokio::select! {
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    None => break,
                };
                actor.handle_message(msg).await;
            },
            Some(msg) = actor.receiver_internal.recv() => {
                actor.handle_message(msg).await;
            }
        }
        if actor.closed {
            break;
        }
    }
    // Every handle is gone or shutdown was requested.
    actor.close();
}
