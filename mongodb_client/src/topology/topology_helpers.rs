use std::time::Duration;

use tokio::sync::oneshot;

use crate::{MongoError, ServerAddress, ServerDescription, TopologyType};

#[derive(Debug)]
pub(crate) enum TopologyMessage {
    /// A monitor finished checking a server.
    UpdateServer(ServerDescription),
    /// An operation against `address` failed. Network and state change errors mark the server
    /// Unknown.
    HandleApplicationError {
        address: ServerAddress,
        error: MongoError,
    },
    /// Server selection found nothing suitable. Wakes every monitor.
    RequestImmediateCheck,
    /// Stops every monitor, emits the closing events and ends the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HeartbeatOptions {
    pub(crate) heartbeat_frequency: Duration,
    pub(crate) min_heartbeat_frequency: Duration,
    pub(crate) connect_timeout: Duration,
}

/// Everything the topology actor needs to start.
#[derive(Clone, Debug)]
pub(crate) struct TopologyOptions {
    pub(crate) seeds: Vec<ServerAddress>,
    pub(crate) initial_type: TopologyType,
    pub(crate) set_name: Option<String>,
    pub(crate) heartbeat: HeartbeatOptions,
}

impl TopologyOptions {
    pub(crate) fn is_load_balanced(&self) -> bool {
        self.initial_type == TopologyType::LoadBalanced
    }
}
