use std::{fmt, sync::Arc, time::Duration};

use bson::Document;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{MongoError, ServerAddress, ServerDescription, TopologyDescription};

/// How many events a slow [`broadcast`] subscriber may fall behind before it starts missing some.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub enum Event {
    Sdam(SdamEvent),
    Heartbeat(HeartbeatEvent),
    Command(CommandEvent),
}

/// Discovery and monitoring events. For any single topology they are emitted in the order the
/// transitions happened.
#[derive(Clone, Debug)]
pub enum SdamEvent {
    TopologyOpening {
        topology_id: Uuid,
    },
    TopologyDescriptionChanged {
        topology_id: Uuid,
        previous_description: Arc<TopologyDescription>,
        new_description: Arc<TopologyDescription>,
    },
    ServerOpening {
        topology_id: Uuid,
        address: ServerAddress,
    },
    ServerDescriptionChanged {
        topology_id: Uuid,
        address: ServerAddress,
        previous_description: Box<ServerDescription>,
        new_description: Box<ServerDescription>,
    },
    ServerClosed {
        topology_id: Uuid,
        address: ServerAddress,
    },
    TopologyClosed {
        topology_id: Uuid,
    },
}

#[derive(Clone, Debug)]
pub enum HeartbeatEvent {
    Started {
        address: ServerAddress,
    },
    Succeeded {
        address: ServerAddress,
        duration: Duration,
        reply: Document,
    },
    Failed {
        address: ServerAddress,
        duration: Duration,
        failure: MongoError,
    },
}

#[derive(Clone, Debug)]
pub enum CommandEvent {
    Started {
        request_id: i32,
        address: ServerAddress,
        database: String,
        command_name: String,
        command: Document,
    },
    Succeeded {
        request_id: i32,
        address: ServerAddress,
        command_name: String,
        duration: Duration,
        reply: Document,
    },
    Failed {
        request_id: i32,
        address: ServerAddress,
        command_name: String,
        duration: Duration,
        failure: MongoError,
    },
}

/// Receives every event the client emits. Handlers are called synchronously from the task that
/// produced the event, so they should return quickly.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle_event(&self, event: &Event) {
        self(event)
    }
}

/// Fans events out to the registered handlers and to any [`broadcast`] subscribers.
#[derive(Clone)]
pub(crate) struct EventBus {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub(crate) fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            handlers: Arc::new(handlers),
            sender,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        for handler in self.handlers.iter() {
            handler.handle_event(&event);
        }
        // No receivers is not an error, nobody asked to listen.
        let _ = self.sender.send(event);
    }

    pub(crate) fn emit_sdam(&self, event: SdamEvent) {
        tracing::trace!("{:?}", &event);
        self.emit(Event::Sdam(event));
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
