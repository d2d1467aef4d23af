use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use crate::{events::EventBus, MongoError, ServerAddress, TopologyDescription, Transport};

use super::{run_topology_actor, TopologyActor, TopologyMessage, TopologyOptions};

/**
This is a handle to the topology actor.

Only one topology actor exists per [`Client`](crate::Client). Cloning this handle is very cheap
and does not start a new actor. Reading the current [`TopologyDescription`] never talks to the
actor: snapshots are published through a watch channel. When the last handle is dropped the actor
closes the topology and stops its monitors.
*/
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    sender: mpsc::Sender<TopologyMessage>,
    watcher: watch::Receiver<Arc<TopologyDescription>>,
}

impl Topology {
    pub(crate) fn new(
        options: TopologyOptions,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(8);
        let (actor, watcher) = TopologyActor::new(receiver, options, transport, events);
        tokio::spawn(run_topology_actor(actor));

        Self { sender, watcher }
    }

    /// The latest published snapshot.
    pub(crate) fn description(&self) -> Arc<TopologyDescription> {
        self.watcher.borrow().clone()
    }

    pub(crate) fn watcher(&self) -> watch::Receiver<Arc<TopologyDescription>> {
        self.watcher.clone()
    }

    #[instrument(
        level = "debug",
        name = "Topology Handle - Handle Application Error",
        skip(self)
    )]
    pub(crate) async fn handle_application_error(&self, address: ServerAddress, error: MongoError) {
        let _ = self
            .sender
            .send(TopologyMessage::HandleApplicationError { address, error })
            .await;
    }

    /// Never waits: if the actor already has a request queued this one is redundant.
    pub(crate) fn request_immediate_check(&self) {
        let _ = self.sender.try_send(TopologyMessage::RequestImmediateCheck);
    }

    /// Closes the topology and waits for the closing events to be emitted. Calling this more
    /// than once is harmless.
    #[instrument(level = "debug", name = "Topology Handle - Shutdown", skip(self))]
    pub(crate) async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(TopologyMessage::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            tracing::trace!("Topology actor already stopped");
            return;
        }
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::{
        test_util::{address, hello_primary, hello_standalone, EventRecorder, MockTransport},
        topology::HeartbeatOptions,
        ServerType, TopologyType,
    };

    fn options(seeds: &[&str], initial_type: TopologyType, set_name: Option<&str>) -> TopologyOptions {
        TopologyOptions {
            seeds: seeds.iter().map(|s| address(s)).collect(),
            initial_type,
            set_name: set_name.map(str::to_string),
            heartbeat: HeartbeatOptions {
                heartbeat_frequency: Duration::from_secs(10),
                min_heartbeat_frequency: Duration::from_millis(500),
                connect_timeout: Duration::from_secs(1),
            },
        }
    }

    async fn wait_for(
        topology: &Topology,
        predicate: impl Fn(&TopologyDescription) -> bool,
    ) -> Arc<TopologyDescription> {
        let mut watcher = topology.watcher();
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = watcher.borrow_and_update().clone();
                if predicate(&current) {
                    return current;
                }
                if watcher.changed().await.is_err() {
                    return current;
                }
            }
        })
        .await;
        assert_ok!(result)
    }

    #[tokio::test(start_paused = true)]
    async fn monitors_discover_a_replica_set_from_one_seed() {
        // Arrange
        let transport = MockTransport::new();
        let hosts = ["a:27017", "b:27017"];
        transport.set_hello_reply(&address("a:27017"), hello_primary("rs", &hosts, 1));
        transport.set_hello_reply(&address("b:27017"), crate::test_util::hello_secondary("rs", &hosts, Some("a:27017")));
        let recorder = EventRecorder::new();

        // Act
        let topology = Topology::new(
            options(&["a:27017"], TopologyType::Unknown, None),
            Arc::new(transport.clone()),
            recorder.event_bus(),
        );
        let description = wait_for(&topology, |d| {
            d.server(&address("b:27017"))
                .map(|s| s.server_type == ServerType::RsSecondary)
                .unwrap_or(false)
        })
        .await;

        // Assert
        assert_eq!(description.topology_type(), TopologyType::ReplicaSetWithPrimary);
        assert_eq!(description.set_name(), Some("rs"));
    }

    #[tokio::test(start_paused = true)]
    async fn load_balanced_topologies_are_never_monitored() {
        let transport = MockTransport::new();
        let recorder = EventRecorder::new();

        let topology = Topology::new(
            options(&["lb:27017"], TopologyType::LoadBalanced, None),
            Arc::new(transport.clone()),
            recorder.event_bus(),
        );

        let description = topology.description();
        assert_eq!(description.topology_type(), TopologyType::LoadBalanced);
        assert_eq!(
            description.server(&address("lb:27017")).unwrap().server_type,
            ServerType::LoadBalancer
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.hello_count(&address("lb:27017")), 0);
        assert!(recorder.heartbeat_event_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_emits_closing_events_once() {
        // Arrange
        let transport = MockTransport::new();
        transport.set_hello_reply(&address("a:27017"), hello_standalone());
        let recorder = EventRecorder::new();
        let topology = Topology::new(
            options(&["a:27017"], TopologyType::Unknown, None),
            Arc::new(transport.clone()),
            recorder.event_bus(),
        );
        wait_for(&topology, |d| d.topology_type() == TopologyType::Single).await;

        // Act
        topology.shutdown().await;
        topology.shutdown().await;

        // Assert
        let names = recorder.sdam_event_names();
        assert_eq!(names[names.len() - 2..], ["ServerClosed", "TopologyClosed"]);
        assert_eq!(names.iter().filter(|n| **n == "TopologyClosed").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn state_change_errors_from_operations_mark_the_server_unknown() {
        // Arrange
        let transport = MockTransport::new();
        transport.set_hello_reply(&address("a:27017"), hello_standalone());
        let recorder = EventRecorder::new();
        let topology = Topology::new(
            options(&["a:27017"], TopologyType::Unknown, None),
            Arc::new(transport.clone()),
            recorder.event_bus(),
        );
        wait_for(&topology, |d| d.topology_type() == TopologyType::Single).await;
        let mut watcher = topology.watcher();
        watcher.borrow_and_update();

        // Act
        topology
            .handle_application_error(
                address("a:27017"),
                crate::CommandError::new(10107, "NotWritablePrimary", "not primary").into(),
            )
            .await;
        watcher.changed().await.unwrap();

        // Assert
        let server = watcher.borrow().server(&address("a:27017")).cloned().unwrap();
        assert_eq!(server.server_type, ServerType::Unknown);
    }
}
