use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};

use crate::{
    bson_util,
    events::{CommandEvent, EventBus, HeartbeatEvent},
    Event, EventHandler, MongoError, MonitorConnection, SdamEvent, ServerAddress, ServerType,
    Transport,
};

static TRACING: Once = Once::new();

/// Installs a subscriber once per test binary. Logs are only printed when `TEST_LOG` is set.
pub(crate) fn init_tracing() {
    TRACING.call_once(|| {
        use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
        use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

        let _ = tracing_log::LogTracer::init();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        if std::env::var("TEST_LOG").is_ok() {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new("test".into(), std::io::stdout));
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else {
            let subscriber = Registry::default()
                .with(env_filter)
                .with(JsonStorageLayer)
                .with(BunyanFormattingLayer::new("test".into(), std::io::sink));
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    });
}

pub(crate) fn address(host: &str) -> ServerAddress {
    ServerAddress::parse(host).unwrap()
}

pub(crate) fn hello_standalone() -> Document {
    doc! {
        "ok": 1,
        "isWritablePrimary": true,
        "minWireVersion": 0,
        "maxWireVersion": 21,
        "logicalSessionTimeoutMinutes": 30,
    }
}

pub(crate) fn hello_primary(set_name: &str, hosts: &[&str], election: u8) -> Document {
    let mut election_id = [0_u8; 12];
    election_id[11] = election;
    doc! {
        "ok": 1,
        "isWritablePrimary": true,
        "setName": set_name,
        "hosts": hosts,
        "setVersion": 1,
        "electionId": ObjectId::from_bytes(election_id),
        "minWireVersion": 0,
        "maxWireVersion": 21,
        "logicalSessionTimeoutMinutes": 30,
    }
}

pub(crate) fn hello_secondary(set_name: &str, hosts: &[&str], primary: Option<&str>) -> Document {
    let mut reply = doc! {
        "ok": 1,
        "isWritablePrimary": false,
        "secondary": true,
        "setName": set_name,
        "hosts": hosts,
        "minWireVersion": 0,
        "maxWireVersion": 21,
        "logicalSessionTimeoutMinutes": 30,
    };
    if let Some(primary) = primary {
        reply.insert("primary", primary);
    }
    reply
}

#[derive(Default)]
struct MockState {
    hello: HashMap<ServerAddress, Result<Document, MongoError>>,
    hello_counts: HashMap<ServerAddress, usize>,
    scripted: HashMap<String, VecDeque<Result<Document, MongoError>>>,
    commands: Vec<(ServerAddress, String, Document)>,
}

/// A scripted transport. Heartbeats answer with the reply set per server; commands answer with
/// the replies queued per command name, in order.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_hello_reply(&self, address: &ServerAddress, reply: Document) {
        self.state
            .lock()
            .unwrap()
            .hello
            .insert(address.clone(), Ok(reply));
    }

    pub(crate) fn set_hello_error(&self, address: &ServerAddress, message: &str) {
        self.state.lock().unwrap().hello.insert(
            address.clone(),
            Err(MongoError::network(Some(address.clone()), message)),
        );
    }

    pub(crate) fn hello_count(&self, address: &ServerAddress) -> usize {
        self.state
            .lock()
            .unwrap()
            .hello_counts
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn push_reply(&self, command_name: &str, reply: Document) {
        self.push(command_name, Ok(reply));
    }

    pub(crate) fn push_error(&self, command_name: &str, error: MongoError) {
        self.push(command_name, Err(error));
    }

    fn push(&self, command_name: &str, result: Result<Document, MongoError>) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(command_name.to_string())
            .or_default()
            .push_back(result);
    }

    /// Every command sent so far as `(address, database, command)`.
    pub(crate) fn commands(&self) -> Vec<(ServerAddress, String, Document)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub(crate) fn commands_named(&self, command_name: &str) -> Vec<(ServerAddress, String, Document)> {
        self.commands()
            .into_iter()
            .filter(|(_, _, command)| bson_util::command_name(command) == command_name)
            .collect()
    }

    fn hello(&self, address: &ServerAddress) -> Result<Document, MongoError> {
        let mut state = self.state.lock().unwrap();
        *state.hello_counts.entry(address.clone()).or_default() += 1;
        match state.hello.get(address) {
            Some(result) => result.clone(),
            None => Err(MongoError::network(
                Some(address.clone()),
                "connection refused",
            )),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn run_command(
        &self,
        address: &ServerAddress,
        database: &str,
        command: Document,
    ) -> Result<Document, MongoError> {
        let command_name = bson_util::command_name(&command);
        let mut state = self.state.lock().unwrap();
        state
            .commands
            .push((address.clone(), database.to_string(), command));

        match state
            .scripted
            .get_mut(&command_name)
            .and_then(VecDeque::pop_front)
        {
            Some(result) => result,
            None if command_name == "killCursors" => Ok(doc! { "ok": 1 }),
            None => Ok(doc! {
                "ok": 0,
                "code": 8000,
                "codeName": "NoScriptedReply",
                "errmsg": format!("no reply scripted for {}", command_name),
            }),
        }
    }

    async fn connect_monitor(
        &self,
        address: &ServerAddress,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn MonitorConnection>, MongoError> {
        Ok(Box::new(MockConnection {
            transport: self.clone(),
            address: address.clone(),
        }))
    }
}

struct MockConnection {
    transport: MockTransport,
    address: ServerAddress,
}

#[async_trait]
impl MonitorConnection for MockConnection {
    async fn hello(&mut self, _timeout: Duration) -> Result<Document, MongoError> {
        self.transport.hello(&self.address)
    }
}

/// Collects every emitted event.
#[derive(Clone, Default)]
pub(crate) struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handler(&self) -> Arc<dyn EventHandler> {
        let events = self.events.clone();
        Arc::new(move |event: &Event| events.lock().unwrap().push(event.clone()))
    }

    pub(crate) fn event_bus(&self) -> EventBus {
        EventBus::new(vec![self.handler()])
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub(crate) fn sdam_event_names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Sdam(event) => Some(match event {
                    SdamEvent::TopologyOpening { .. } => "TopologyOpening",
                    SdamEvent::TopologyDescriptionChanged { .. } => "TopologyDescriptionChanged",
                    SdamEvent::ServerOpening { .. } => "ServerOpening",
                    SdamEvent::ServerDescriptionChanged { .. } => "ServerDescriptionChanged",
                    SdamEvent::ServerClosed { .. } => "ServerClosed",
                    SdamEvent::TopologyClosed { .. } => "TopologyClosed",
                }),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn heartbeat_event_names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                Event::Heartbeat(HeartbeatEvent::Started { .. }) => Some("HeartbeatStarted"),
                Event::Heartbeat(HeartbeatEvent::Succeeded { .. }) => Some("HeartbeatSucceeded"),
                Event::Heartbeat(HeartbeatEvent::Failed { .. }) => Some("HeartbeatFailed"),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn command_event_names(&self) -> Vec<(&'static str, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Command(CommandEvent::Started { command_name, .. }) => {
                    Some(("CommandStarted", command_name))
                }
                Event::Command(CommandEvent::Succeeded { command_name, .. }) => {
                    Some(("CommandSucceeded", command_name))
                }
                Event::Command(CommandEvent::Failed { command_name, .. }) => {
                    Some(("CommandFailed", command_name))
                }
                _ => None,
            })
            .collect()
    }

    /// `(address, previous type, new type)` for every `ServerDescriptionChanged`.
    pub(crate) fn server_description_changes(&self) -> Vec<(ServerAddress, ServerType, ServerType)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Sdam(SdamEvent::ServerDescriptionChanged {
                    address,
                    previous_description,
                    new_description,
                    ..
                }) => Some((
                    address,
                    previous_description.server_type,
                    new_description.server_type,
                )),
                _ => None,
            })
            .collect()
    }
}
