use std::{fmt, time::Duration};

use bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};

use crate::{bson_util, CommandError, MongoError, ServerAddress};

/// Oldest wire version this client can talk to (MongoDB 3.6).
pub const MIN_SUPPORTED_WIRE_VERSION: i32 = 6;
/// Newest wire version this client knows about.
pub const MAX_SUPPORTED_WIRE_VERSION: i32 = 25;

/// Weight given to the newest sample of the round-trip time moving average.
const ROUND_TRIP_TIME_WEIGHT: f64 = 0.2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerType {
    #[default]
    Unknown,
    Standalone,
    Mongos,
    PossiblePrimary,
    #[serde(rename = "RSPrimary")]
    RsPrimary,
    #[serde(rename = "RSSecondary")]
    RsSecondary,
    #[serde(rename = "RSArbiter")]
    RsArbiter,
    #[serde(rename = "RSOther")]
    RsOther,
    #[serde(rename = "RSGhost")]
    RsGhost,
    LoadBalancer,
}

impl ServerType {
    /// Servers that can hold data and answer reads.
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
                | ServerType::LoadBalancer
        )
    }

    pub fn is_replica_set_member(&self) -> bool {
        matches!(
            self,
            ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::RsArbiter
                | ServerType::RsOther
                | ServerType::RsGhost
        )
    }
}

/// `topologyVersion` as reported by servers 4.4+. Versions from different processes are not
/// comparable: a restarted server starts a new sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyVersion {
    pub process_id: ObjectId,
    pub counter: i64,
}

impl TopologyVersion {
    pub fn from_document(document: &Document) -> Option<Self> {
        Some(Self {
            process_id: document.get_object_id("processId").ok()?,
            counter: bson_util::get_int(document, "counter")?,
        })
    }

    /// True when `self` comes from the same process as `other` and is strictly older.
    pub fn is_older_than(&self, other: &TopologyVersion) -> bool {
        self.process_id == other.process_id && self.counter < other.counter
    }

    /// True when `self` comes from the same process as `other` and is not newer.
    pub fn is_not_newer_than(&self, other: &TopologyVersion) -> bool {
        self.process_id == other.process_id && self.counter <= other.counter
    }
}

/// Snapshot of what the client last observed about one server.
///
/// Descriptions are never updated in place: every heartbeat (successful or not) produces a new
/// one that replaces the previous description in the topology.
#[derive(Clone, Debug)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    /// Moving average of the heartbeat round-trip time. Ignored by equality.
    pub average_round_trip_time: Option<Duration>,
    pub hosts: Vec<ServerAddress>,
    pub passives: Vec<ServerAddress>,
    pub arbiters: Vec<ServerAddress>,
    pub set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<ObjectId>,
    /// The primary this server believes in.
    pub primary: Option<ServerAddress>,
    /// The address the server reports for itself.
    pub me: Option<ServerAddress>,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub logical_session_timeout: Option<Duration>,
    pub topology_version: Option<TopologyVersion>,
    /// Why the last check failed, if it did.
    pub error: Option<String>,
}

impl ServerDescription {
    pub fn new_unknown(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            average_round_trip_time: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            set_name: None,
            set_version: None,
            election_id: None,
            primary: None,
            me: None,
            min_wire_version: 0,
            max_wire_version: 0,
            logical_session_timeout: None,
            topology_version: None,
            error: None,
        }
    }

    /// An Unknown description recording why the server could not be reached or was demoted.
    pub fn from_error(address: ServerAddress, error: &MongoError) -> Self {
        Self {
            topology_version: error.topology_version(),
            error: Some(error.to_string()),
            ..Self::new_unknown(address)
        }
    }

    pub(crate) fn with_error_message(address: ServerAddress, message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::new_unknown(address)
        }
    }

    pub(crate) fn possible_primary(address: ServerAddress) -> Self {
        Self {
            server_type: ServerType::PossiblePrimary,
            ..Self::new_unknown(address)
        }
    }

    pub(crate) fn load_balancer(address: ServerAddress) -> Self {
        Self {
            server_type: ServerType::LoadBalancer,
            ..Self::new_unknown(address)
        }
    }

    /// Builds a description from a `hello` (or legacy `isMaster`) reply.
    pub fn from_hello_reply(
        address: ServerAddress,
        reply: &Document,
        average_round_trip_time: Option<Duration>,
    ) -> Self {
        if let Some(error) = CommandError::from_reply(reply) {
            return Self::from_error(address, &MongoError::Command(error));
        }

        let server_type = server_type_from_reply(reply);
        if server_type == ServerType::Unknown {
            return Self::new_unknown(address);
        }

        let addresses = |key: &str| -> Vec<ServerAddress> {
            bson_util::get_string_list(reply, key)
                .iter()
                .filter_map(|host| match ServerAddress::parse(host) {
                    Ok(address) => Some(address),
                    Err(e) => {
                        tracing::warn!(host = %host, "Ignoring invalid host in hello reply: {}", e);
                        None
                    }
                })
                .collect()
        };
        let single_address = |key: &str| -> Option<ServerAddress> {
            reply
                .get_str(key)
                .ok()
                .and_then(|host| ServerAddress::parse(host).ok())
        };

        Self {
            server_type,
            average_round_trip_time,
            hosts: addresses("hosts"),
            passives: addresses("passives"),
            arbiters: addresses("arbiters"),
            set_name: reply.get_str("setName").ok().map(str::to_string),
            set_version: bson_util::get_int(reply, "setVersion")
                .and_then(|version| i32::try_from(version).ok()),
            election_id: reply.get_object_id("electionId").ok(),
            primary: single_address("primary"),
            me: single_address("me"),
            min_wire_version: wire_version(reply, "minWireVersion"),
            max_wire_version: wire_version(reply, "maxWireVersion"),
            logical_session_timeout: bson_util::get_int(reply, "logicalSessionTimeoutMinutes")
                .and_then(|minutes| u64::try_from(minutes).ok())
                .map(|minutes| Duration::from_secs(minutes * 60)),
            topology_version: reply
                .get_document("topologyVersion")
                .ok()
                .and_then(TopologyVersion::from_document),
            ..Self::new_unknown(address)
        }
    }

    /// Every member this server reports: hosts, passives and arbiters.
    pub fn known_hosts(&self) -> impl Iterator<Item = &ServerAddress> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
    }

    pub fn is_available(&self) -> bool {
        self.server_type != ServerType::Unknown
    }

    /// Returns an error message when the server's wire version range does not overlap the one
    /// this client supports.
    pub fn compatibility_error(&self) -> Option<String> {
        if !self.is_available() {
            return None;
        }
        if self.min_wire_version > MAX_SUPPORTED_WIRE_VERSION {
            return Some(format!(
                "Server at {} requires wire version {}, but this client only supports up to {}",
                self.address, self.min_wire_version, MAX_SUPPORTED_WIRE_VERSION
            ));
        }
        if self.max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
            return Some(format!(
                "Server at {} reports wire version {}, but this client requires at least {}",
                self.address, self.max_wire_version, MIN_SUPPORTED_WIRE_VERSION
            ));
        }
        None
    }
}

/// Equality ignores the round-trip time so latency jitter alone never counts as a change.
impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.server_type == other.server_type
            && self.hosts == other.hosts
            && self.passives == other.passives
            && self.arbiters == other.arbiters
            && self.set_name == other.set_name
            && self.set_version == other.set_version
            && self.election_id == other.election_id
            && self.primary == other.primary
            && self.me == other.me
            && self.min_wire_version == other.min_wire_version
            && self.max_wire_version == other.max_wire_version
            && self.logical_session_timeout == other.logical_session_timeout
            && self.topology_version == other.topology_version
            && self.error == other.error
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}", self.address, self.server_type)?;
        if let Some(rtt) = self.average_round_trip_time {
            write!(f, ", rtt: {:?}", rtt)?;
        }
        if let Some(error) = &self.error {
            write!(f, ", error: {}", error)?;
        }
        write!(f, ")")
    }
}

fn wire_version(reply: &Document, key: &str) -> i32 {
    bson_util::get_int(reply, key)
        .and_then(|version| i32::try_from(version).ok())
        .unwrap_or(0)
}

fn server_type_from_reply(reply: &Document) -> ServerType {
    if !bson_util::is_ok(reply) {
        return ServerType::Unknown;
    }
    if bson_util::get_bool(reply, "isreplicaset") {
        return ServerType::RsGhost;
    }
    if reply.get_str("msg").ok() == Some("isdbgrid") {
        return ServerType::Mongos;
    }
    if reply.contains_key("setName") {
        if bson_util::get_bool(reply, "isWritablePrimary") || bson_util::get_bool(reply, "ismaster")
        {
            return ServerType::RsPrimary;
        }
        if bson_util::get_bool(reply, "secondary") {
            return ServerType::RsSecondary;
        }
        if bson_util::get_bool(reply, "arbiterOnly") {
            return ServerType::RsArbiter;
        }
        return ServerType::RsOther;
    }
    ServerType::Standalone
}

/// Folds a new heartbeat sample into the moving average.
pub(crate) fn next_round_trip_time(previous: Option<Duration>, sample: Duration) -> Duration {
    match previous {
        Some(previous) => Duration::from_secs_f64(
            ROUND_TRIP_TIME_WEIGHT * sample.as_secs_f64()
                + (1.0 - ROUND_TRIP_TIME_WEIGHT) * previous.as_secs_f64(),
        ),
        None => sample,
    }
}
