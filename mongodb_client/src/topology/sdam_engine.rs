use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    events::EventBus, MongoError, SdamEvent, ServerAddress, ServerDescription,
    TopologyDescription,
};

/// Servers that entered or left the topology in one transition.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TopologyChanges {
    pub(crate) added: Vec<ServerAddress>,
    pub(crate) removed: Vec<ServerAddress>,
}

/// Owns the current [`TopologyDescription`].
///
/// Every transition publishes the new snapshot on the watch channel and, when something other
/// than round-trip times changed, emits the matching SDAM events. The engine is only ever driven
/// from the topology actor, which is what keeps the events in transition order.
pub(crate) struct SdamEngine {
    description: Arc<TopologyDescription>,
    publisher: watch::Sender<Arc<TopologyDescription>>,
    events: EventBus,
}

impl SdamEngine {
    pub(crate) fn new(
        initial: TopologyDescription,
        events: EventBus,
    ) -> (Self, watch::Receiver<Arc<TopologyDescription>>) {
        let description = Arc::new(initial);
        let (publisher, watcher) = watch::channel(description.clone());
        (
            Self {
                description,
                publisher,
                events,
            },
            watcher,
        )
    }

    pub(crate) fn description(&self) -> Arc<TopologyDescription> {
        self.description.clone()
    }

    /// Emits `TopologyOpening` and seeds the topology with Unknown servers.
    pub(crate) fn open(&mut self, seeds: &[ServerAddress]) -> TopologyChanges {
        self.events.emit_sdam(SdamEvent::TopologyOpening {
            topology_id: self.description.topology_id(),
        });
        let seeded = self.description.with_seeds(seeds);
        self.transition(seeded, None)
    }

    /// Applies one observation. Returns `None` when the observation was ignored.
    pub(crate) fn update_server(&mut self, server: ServerDescription) -> Option<TopologyChanges> {
        let address = server.address.clone();
        let next = self.description.apply(server)?;
        Some(self.transition(next, Some(&address)))
    }

    /// Marks the server Unknown after a network or state change error seen by an operation,
    /// unless the error carries a topology version that is not newer than the recorded one.
    pub(crate) fn handle_application_error(
        &mut self,
        address: &ServerAddress,
        error: &MongoError,
    ) -> Option<TopologyChanges> {
        if !error.is_network_error() && !error.is_state_change_error() {
            return None;
        }

        let current = self.description.server(address)?;
        if let (Some(incoming), Some(recorded)) =
            (error.topology_version(), &current.topology_version)
        {
            if incoming.is_not_newer_than(recorded) {
                tracing::debug!(
                    address = %address,
                    "Ignoring application error with a stale topology version"
                );
                return None;
            }
        }

        tracing::info!(address = %address, "Marking server Unknown after error: {}", error);
        self.update_server(ServerDescription::from_error(address.clone(), error))
    }

    /// Emits `ServerClosed` for every tracked server followed by `TopologyClosed`.
    pub(crate) fn close(&mut self) -> Vec<ServerAddress> {
        let topology_id = self.description.topology_id();
        let servers = self.description.servers().keys().cloned().collect::<Vec<_>>();
        for address in &servers {
            self.events.emit_sdam(SdamEvent::ServerClosed {
                topology_id,
                address: address.clone(),
            });
        }
        self.events
            .emit_sdam(SdamEvent::TopologyClosed { topology_id });
        servers
    }

    fn transition(
        &mut self,
        next: TopologyDescription,
        incoming: Option<&ServerAddress>,
    ) -> TopologyChanges {
        let previous = std::mem::replace(&mut self.description, Arc::new(next));
        let current = self.description.clone();
        self.publisher.send_replace(current.clone());

        if previous == current {
            return TopologyChanges::default();
        }

        let topology_id = current.topology_id();
        let mut changed = previous
            .servers()
            .iter()
            .filter_map(|(address, before)| match current.server(address) {
                Some(after) if after != before => Some((address, before, after)),
                _ => None,
            })
            .collect::<Vec<_>>();
        if let Some(incoming) = incoming {
            if let Some(position) = changed.iter().position(|(address, ..)| *address == incoming) {
                let first = changed.remove(position);
                changed.insert(0, first);
            }
        }
        for (address, before, after) in changed {
            self.events.emit_sdam(SdamEvent::ServerDescriptionChanged {
                topology_id,
                address: address.clone(),
                previous_description: Box::new(before.clone()),
                new_description: Box::new(after.clone()),
            });
        }

        self.events
            .emit_sdam(SdamEvent::TopologyDescriptionChanged {
                topology_id,
                previous_description: previous.clone(),
                new_description: current.clone(),
            });

        let removed = previous
            .servers()
            .keys()
            .filter(|address| current.server(address).is_none())
            .cloned()
            .collect::<Vec<_>>();
        let added = current
            .servers()
            .keys()
            .filter(|address| previous.server(address).is_none())
            .cloned()
            .collect::<Vec<_>>();
        for address in &removed {
            self.events.emit_sdam(SdamEvent::ServerClosed {
                topology_id,
                address: address.clone(),
            });
        }
        for address in &added {
            self.events.emit_sdam(SdamEvent::ServerOpening {
                topology_id,
                address: address.clone(),
            });
        }

        TopologyChanges { added, removed }
    }
}
