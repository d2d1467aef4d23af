use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::Duration,
};

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ServerAddress, ServerDescription, ServerType};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyType {
    #[default]
    Unknown,
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    LoadBalanced,
}

/// Snapshot of the whole deployment as currently understood.
///
/// A description is never mutated once it has been published. [`TopologyDescription::apply`]
/// computes the next description from the current one plus a single new [`ServerDescription`],
/// so every observable transition is an atomic before/after pair.
#[derive(Clone, Debug, PartialEq)]
pub struct TopologyDescription {
    topology_id: Uuid,
    topology_type: TopologyType,
    servers: BTreeMap<ServerAddress, ServerDescription>,
    // Fixed when seeding. A standalone only forms a Single topology when it was the only seed.
    single_seed: bool,
    set_name: Option<String>,
    max_set_version: Option<i32>,
    max_election_id: Option<ObjectId>,
    logical_session_timeout: Option<Duration>,
    compatibility_error: Option<String>,
}

impl TopologyDescription {
    /// A description without any servers. Used as the "previous" side of the very first change.
    pub fn new(topology_id: Uuid, topology_type: TopologyType, set_name: Option<String>) -> Self {
        Self {
            topology_id,
            topology_type,
            servers: BTreeMap::new(),
            single_seed: false,
            set_name,
            max_set_version: None,
            max_election_id: None,
            logical_session_timeout: None,
            compatibility_error: None,
        }
    }

    /// Returns a copy of this description tracking every seed as an Unknown server.
    pub fn with_seeds(&self, seeds: &[ServerAddress]) -> Self {
        let mut next = self.clone();
        for seed in seeds {
            next.servers
                .entry(seed.clone())
                .or_insert_with(|| ServerDescription::new_unknown(seed.clone()));
        }
        next.single_seed = next.servers.len() == 1;
        next.refresh_derived_fields();
        next
    }

    pub fn topology_id(&self) -> Uuid {
        self.topology_id
    }

    pub fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub fn servers(&self) -> &BTreeMap<ServerAddress, ServerDescription> {
        &self.servers
    }

    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    pub fn max_set_version(&self) -> Option<i32> {
        self.max_set_version
    }

    pub fn max_election_id(&self) -> Option<ObjectId> {
        self.max_election_id
    }

    /// The smallest session timeout among data-bearing servers, or `None` when any of them does
    /// not support sessions.
    pub fn logical_session_timeout(&self) -> Option<Duration> {
        self.logical_session_timeout
    }

    pub fn compatibility_error(&self) -> Option<&str> {
        self.compatibility_error.as_deref()
    }

    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers
            .values()
            .find(|server| server.server_type == ServerType::RsPrimary)
    }

    pub fn has_primary(&self) -> bool {
        self.primary().is_some()
    }

    /// Computes the description that results from observing `server`.
    ///
    /// Returns `None` when the observation must be ignored: the address is no longer part of
    /// the topology, or the description is older than the one already recorded.
    pub fn apply(&self, server: ServerDescription) -> Option<TopologyDescription> {
        let current = self.servers.get(&server.address)?;

        if let (Some(incoming), Some(recorded)) =
            (&server.topology_version, &current.topology_version)
        {
            if incoming.is_older_than(recorded) {
                tracing::debug!(
                    address = %server.address,
                    "Ignoring server description with a stale topology version"
                );
                return None;
            }
        }

        let mut next = self.clone();
        next.update(server);
        next.refresh_derived_fields();
        Some(next)
    }

    fn update(&mut self, server: ServerDescription) {
        self.servers.insert(server.address.clone(), server.clone());

        match self.topology_type {
            TopologyType::Single => self.update_single(server),
            TopologyType::LoadBalanced => {}
            TopologyType::Unknown => self.update_unknown(server),
            TopologyType::Sharded => self.update_sharded(server),
            TopologyType::ReplicaSetNoPrimary => self.update_replica_set_no_primary(server),
            TopologyType::ReplicaSetWithPrimary => self.update_replica_set_with_primary(server),
        }
    }

    fn update_single(&mut self, server: ServerDescription) {
        if let Some(set_name) = &self.set_name {
            if server.is_available() && server.set_name.as_ref() != Some(set_name) {
                let message = format!(
                    "Replica set name mismatch: expected `{}`, server reported {:?}",
                    set_name, server.set_name
                );
                self.servers.insert(
                    server.address.clone(),
                    ServerDescription::with_error_message(server.address, &message),
                );
            }
        }
    }

    fn update_unknown(&mut self, server: ServerDescription) {
        match server.server_type {
            ServerType::Standalone | ServerType::LoadBalancer => {
                if self.single_seed {
                    self.topology_type = TopologyType::Single;
                } else {
                    self.servers.remove(&server.address);
                }
            }
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => self.update_replica_set_from_primary(server),
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_replica_set_without_primary(server);
            }
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {}
        }
    }

    fn update_sharded(&mut self, server: ServerDescription) {
        match server.server_type {
            ServerType::Unknown | ServerType::Mongos => {}
            _ => {
                self.servers.remove(&server.address);
            }
        }
    }

    fn update_replica_set_no_primary(&mut self, server: ServerDescription) {
        match server.server_type {
            ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => {
                self.servers.remove(&server.address);
            }
            ServerType::RsPrimary => self.update_replica_set_from_primary(server),
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_replica_set_without_primary(server)
            }
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {}
        }
    }

    fn update_replica_set_with_primary(&mut self, server: ServerDescription) {
        match server.server_type {
            ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => {
                self.servers.remove(&server.address);
                self.check_if_has_primary();
            }
            ServerType::RsPrimary => self.update_replica_set_from_primary(server),
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_replica_set_with_primary_from_member(server)
            }
            ServerType::Unknown | ServerType::RsGhost | ServerType::PossiblePrimary => {
                self.check_if_has_primary()
            }
        }
    }

    /// Returns `false` (after removing the server) when it belongs to another replica set.
    fn check_set_name(&mut self, server: &ServerDescription) -> bool {
        match &self.set_name {
            None => {
                self.set_name = server.set_name.clone();
                true
            }
            Some(set_name) if server.set_name.as_ref() != Some(set_name) => {
                tracing::warn!(
                    address = %server.address,
                    expected = %set_name,
                    reported = ?server.set_name,
                    "Removing server that belongs to another replica set"
                );
                self.servers.remove(&server.address);
                false
            }
            Some(_) => true,
        }
    }

    fn update_replica_set_from_primary(&mut self, server: ServerDescription) {
        if !self.check_set_name(&server) {
            self.check_if_has_primary();
            return;
        }

        if self.is_stale_primary(&server) {
            tracing::info!(
                address = %server.address,
                election_id = ?server.election_id,
                set_version = ?server.set_version,
                "Ignoring primary with an older election"
            );
            self.servers.insert(
                server.address.clone(),
                ServerDescription::with_error_message(
                    server.address,
                    "Primary marked stale due to an older electionId/setVersion",
                ),
            );
            self.check_if_has_primary();
            return;
        }

        if server.election_id.is_some() || server.set_version.is_some() {
            self.max_election_id = server.election_id;
            self.max_set_version = server.set_version;
        }

        // Only one primary can be believed at a time; the newer election wins.
        let demoted = self
            .servers
            .iter()
            .filter(|(address, description)| {
                **address != server.address && description.server_type == ServerType::RsPrimary
            })
            .map(|(address, _)| address.clone())
            .collect::<Vec<_>>();
        for address in demoted {
            tracing::info!(address = %address, "Demoting previous primary to Unknown");
            self.servers
                .insert(address.clone(), ServerDescription::new_unknown(address));
        }

        let members = server.known_hosts().cloned().collect::<BTreeSet<_>>();
        for member in &members {
            self.servers
                .entry(member.clone())
                .or_insert_with(|| ServerDescription::new_unknown(member.clone()));
        }
        self.servers.retain(|address, _| members.contains(address));

        self.check_if_has_primary();
    }

    fn update_replica_set_without_primary(&mut self, server: ServerDescription) {
        if !self.check_set_name(&server) {
            return;
        }

        for member in server.known_hosts() {
            self.servers
                .entry(member.clone())
                .or_insert_with(|| ServerDescription::new_unknown(member.clone()));
        }

        if let Some(primary) = &server.primary {
            self.mark_possible_primary(primary);
        }

        if let Some(me) = &server.me {
            if *me != server.address {
                self.servers.remove(&server.address);
            }
        }
    }

    fn update_replica_set_with_primary_from_member(&mut self, server: ServerDescription) {
        if !self.check_set_name(&server) {
            self.check_if_has_primary();
            return;
        }

        if let Some(me) = &server.me {
            if *me != server.address {
                self.servers.remove(&server.address);
                self.check_if_has_primary();
                return;
            }
        }

        if !self.has_primary() {
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
            if let Some(primary) = &server.primary {
                self.mark_possible_primary(primary);
            }
        }
    }

    fn mark_possible_primary(&mut self, address: &ServerAddress) {
        let is_unknown = self
            .servers
            .get(address)
            .map(|server| server.server_type == ServerType::Unknown)
            .unwrap_or(false);
        if is_unknown {
            self.servers.insert(
                address.clone(),
                ServerDescription::possible_primary(address.clone()),
            );
        }
    }

    /// A primary is stale when the `(electionId, setVersion)` pair it reports is older than the
    /// newest pair seen so far.
    fn is_stale_primary(&self, server: &ServerDescription) -> bool {
        if self.max_election_id.is_none() && self.max_set_version.is_none() {
            return false;
        }
        (server.election_id, server.set_version) < (self.max_election_id, self.max_set_version)
    }

    fn check_if_has_primary(&mut self) {
        self.topology_type = if self.has_primary() {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn refresh_derived_fields(&mut self) {
        let mut timeout: Option<Duration> = None;
        let mut any_data_bearing = false;
        let mut all_support_sessions = true;
        for server in self.servers.values() {
            if !server.server_type.is_data_bearing() {
                continue;
            }
            any_data_bearing = true;
            match server.logical_session_timeout {
                Some(server_timeout) => {
                    timeout = Some(timeout.map_or(server_timeout, |t| t.min(server_timeout)))
                }
                None => all_support_sessions = false,
            }
        }
        self.logical_session_timeout = if any_data_bearing && all_support_sessions {
            timeout
        } else {
            None
        };

        self.compatibility_error = self
            .servers
            .values()
            .find_map(ServerDescription::compatibility_error);
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ type: {:?}", self.topology_type)?;
        if let Some(set_name) = &self.set_name {
            write!(f, ", set name: {}", set_name)?;
        }
        write!(f, ", servers: [")?;
        for (index, server) in self.servers.values().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", server)?;
        }
        write!(f, "] }}")
    }
}
