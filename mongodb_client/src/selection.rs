use std::{fmt, time::Duration};

use dyn_clone::DynClone;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::instrument;

use crate::{
    topology::Topology, MongoError, ServerAddress, ServerDescription, ServerType,
    TopologyDescription, TopologyType,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// A caller supplied filter over the servers an operation may run on.
pub trait ServerPredicate: DynClone + Send + Sync {
    fn matches(&self, server: &ServerDescription) -> bool;
}

dyn_clone::clone_trait_object!(ServerPredicate);

impl<F> ServerPredicate for F
where
    F: Fn(&ServerDescription) -> bool + Clone + Send + Sync,
{
    fn matches(&self, server: &ServerDescription) -> bool {
        self(server)
    }
}

/// Which servers an operation may run on.
#[derive(Clone)]
pub enum SelectionCriteria {
    ReadPreference(ReadPreference),
    /// Writes always need a primary, or a mongos, or the load balancer.
    Write,
    /// Any data-bearing server the predicate accepts.
    Predicate(Box<dyn ServerPredicate>),
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        SelectionCriteria::ReadPreference(ReadPreference::Primary)
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_preference: ReadPreference) -> Self {
        SelectionCriteria::ReadPreference(read_preference)
    }
}

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionCriteria::ReadPreference(read_preference) => {
                f.debug_tuple("ReadPreference").field(read_preference).finish()
            }
            SelectionCriteria::Write => write!(f, "Write"),
            SelectionCriteria::Predicate(_) => write!(f, "Predicate"),
        }
    }
}

/// Picks a server for an operation, waiting for the topology to change when nothing suitable is
/// known yet.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ServerSelector {
    pub(crate) timeout: Duration,
    pub(crate) local_threshold: Duration,
}

impl ServerSelector {
    #[instrument(level = "debug", name = "Select Server", skip(self, topology))]
    pub(crate) async fn select(
        &self,
        topology: &Topology,
        criteria: &SelectionCriteria,
    ) -> Result<ServerAddress, MongoError> {
        let deadline = Instant::now() + self.timeout;
        let mut watcher = topology.watcher();

        loop {
            let description = watcher.borrow_and_update().clone();
            if let Some(address) = self.select_from(&description, criteria)? {
                tracing::debug!(address = %address, "Selected server");
                return Ok(address);
            }

            tracing::trace!("No suitable server, waiting for the topology to change");
            topology.request_immediate_check();
            match tokio::time::timeout_at(deadline, watcher.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(MongoError::Shutdown),
                Err(_) => {
                    let topology = watcher.borrow().clone();
                    tracing::warn!("Server selection timed out. Topology: {}", topology);
                    return Err(MongoError::ServerSelectionTimeout {
                        message: format!(
                            "no server matching {:?} was found within {:?}",
                            criteria, self.timeout
                        ),
                        topology,
                    });
                }
            }
        }
    }

    /// One selection attempt against a snapshot.
    pub(crate) fn select_from(
        &self,
        description: &TopologyDescription,
        criteria: &SelectionCriteria,
    ) -> Result<Option<ServerAddress>, MongoError> {
        if let Some(message) = description.compatibility_error() {
            return Err(MongoError::IncompatibleServer {
                message: message.to_string(),
            });
        }

        let suitable = suitable_servers(description, criteria);
        let in_window = within_latency_window(suitable, self.local_threshold);
        Ok(in_window
            .choose(&mut rand::thread_rng())
            .map(|server| server.address.clone()))
    }
}

/// Every server `criteria` allows in the current topology, before the latency window applies.
pub(crate) fn suitable_servers<'a>(
    description: &'a TopologyDescription,
    criteria: &SelectionCriteria,
) -> Vec<&'a ServerDescription> {
    let servers = description.servers().values();
    let of_type = |server_type: ServerType| {
        description
            .servers()
            .values()
            .filter(move |server| server.server_type == server_type)
            .collect::<Vec<_>>()
    };

    if let SelectionCriteria::Predicate(predicate) = criteria {
        return servers
            .filter(|server| server.server_type.is_data_bearing() && predicate.matches(server))
            .collect();
    }

    match description.topology_type() {
        TopologyType::Unknown => Vec::new(),
        TopologyType::Single => servers.filter(|server| server.is_available()).collect(),
        TopologyType::LoadBalanced => of_type(ServerType::LoadBalancer),
        TopologyType::Sharded => of_type(ServerType::Mongos),
        TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
            let read_preference = match criteria {
                SelectionCriteria::ReadPreference(read_preference) => *read_preference,
                _ => ReadPreference::Primary,
            };
            let primary = of_type(ServerType::RsPrimary);
            let secondaries = of_type(ServerType::RsSecondary);
            match read_preference {
                ReadPreference::Primary => primary,
                ReadPreference::Secondary => secondaries,
                ReadPreference::PrimaryPreferred if primary.is_empty() => secondaries,
                ReadPreference::PrimaryPreferred => primary,
                ReadPreference::SecondaryPreferred if secondaries.is_empty() => primary,
                ReadPreference::SecondaryPreferred => secondaries,
                ReadPreference::Nearest => primary.into_iter().chain(secondaries).collect(),
            }
        }
    }
}

/// Keeps the servers whose round-trip time is within `local_threshold` of the fastest one.
pub(crate) fn within_latency_window(
    servers: Vec<&ServerDescription>,
    local_threshold: Duration,
) -> Vec<&ServerDescription> {
    let round_trip_time =
        |server: &ServerDescription| server.average_round_trip_time.unwrap_or_default();
    let fastest = match servers.iter().map(|server| round_trip_time(*server)).min() {
        Some(fastest) => fastest,
        None => return servers,
    };
    servers
        .into_iter()
        .filter(|server| round_trip_time(*server) <= fastest + local_threshold)
        .collect()
}
