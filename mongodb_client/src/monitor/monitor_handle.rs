use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    events::EventBus, topology::{HeartbeatOptions, TopologyMessage}, ServerAddress, Transport,
};

use super::{run_monitor_actor, MonitorActor};

#[derive(Debug)]
pub(crate) enum MonitorMessage {
    /// Check the server as soon as the minimum heartbeat interval allows.
    RequestCheck,
}

/// Handle to the heartbeat task of one server. Dropping or stopping the handle ends the task.
#[derive(Debug)]
pub(crate) struct Monitor {
    sender: mpsc::Sender<MonitorMessage>,
    task: JoinHandle<()>,
}

impl Monitor {
    pub(crate) fn start(
        address: ServerAddress,
        options: HeartbeatOptions,
        transport: Arc<dyn Transport>,
        topology: mpsc::Sender<TopologyMessage>,
        events: EventBus,
    ) -> Self {
        // A single slot is enough: any number of pending requests collapse into one check.
        let (sender, receiver) = mpsc::channel(1);
        let actor = MonitorActor::new(address, options, transport, topology, events, receiver);
        let task = tokio::spawn(run_monitor_actor(actor));

        Self { sender, task }
    }

    pub(crate) fn request_check(&self) {
        let _ = self.sender.try_send(MonitorMessage::RequestCheck);
    }

    pub(crate) fn stop(self) {
        self.task.abort();
    }
}
