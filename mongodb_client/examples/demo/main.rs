use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb_client::{
    ChangeStreamOptions, Client, Event, FullDocumentType, MongoError, MonitorConnection,
    ReadPreference, SdamEvent, ServerAddress, Transport,
};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

const HOSTS: [&str; 2] = ["db0.example.com:27017", "db1.example.com:27017"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let client = Client::builder()
        .set_connection_string(&format!("mongodb://{}/?replicaSet=rs0", HOSTS.join(",")))
        .set_heartbeat_frequency(Duration::from_secs(2))
        .set_transport(Arc::new(SimulatedReplicaSet::default()))
        .add_event_handler(Arc::new(|event: &Event| {
            if let Event::Sdam(SdamEvent::ServerDescriptionChanged {
                address,
                new_description,
                ..
            }) = event
            {
                println!("{} is now {:?}", address, new_description.server_type);
            }
        }))
        .build()?;

    let reply = client
        .run_command(
            "admin",
            doc! { "ping": 1 },
            Some(ReadPreference::SecondaryPreferred.into()),
        )
        .await?;
    println!("ping: {}", reply);
    println!("topology: {}", client.topology_description());

    let collection = client.database("inventory").collection("items");
    let mut stream = collection
        .watch(
            vec![doc! { "$match": { "operationType": "insert" } }],
            ChangeStreamOptions::default().set_full_document(FullDocumentType::UpdateLookup),
        )
        .await?;

    for _ in 0..3 {
        match stream.next().await {
            Ok(Some(event)) => println!(
                "{:?} {:?}: {:?}",
                event.operation_type, event.ns, event.full_document
            ),
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Change stream failed: {}", &e);
                return Err(e.into());
            }
        }
    }
    println!("resume token: {:?}", stream.resume_token());

    stream.kill().await?;
    client.shutdown().await;
    Ok(())
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("mongodb-client-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}

/// A two member replica set that lives in memory. The first host is the primary and every
/// `getMore` produces one insert.
#[derive(Default)]
struct SimulatedReplicaSet {
    inserted: Arc<AtomicI64>,
}

#[async_trait]
impl Transport for SimulatedReplicaSet {
    async fn run_command(
        &self,
        _address: &ServerAddress,
        _database: &str,
        command: Document,
    ) -> Result<Document, MongoError> {
        let name = command.keys().next().cloned().unwrap_or_default();
        let reply = match name.as_str() {
            "ping" | "killCursors" => doc! { "ok": 1 },
            "aggregate" => doc! {
                "cursor": { "id": 7_i64, "ns": "inventory.items", "firstBatch": [] },
                "ok": 1,
            },
            "getMore" => {
                let n = self.inserted.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(200)).await;
                doc! {
                    "cursor": {
                        "id": 7_i64,
                        "ns": "inventory.items",
                        "nextBatch": [{
                            "_id": { "_data": format!("{:08}", n) },
                            "operationType": "insert",
                            "ns": { "db": "inventory", "coll": "items" },
                            "documentKey": { "_id": n },
                            "fullDocument": { "_id": n, "sku": format!("sku-{}", n) },
                        }],
                    },
                    "ok": 1,
                }
            }
            other => doc! {
                "ok": 0,
                "code": 59,
                "codeName": "CommandNotFound",
                "errmsg": format!("no such command: '{}'", other),
            },
        };
        Ok(reply)
    }

    async fn connect_monitor(
        &self,
        address: &ServerAddress,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn MonitorConnection>, MongoError> {
        Ok(Box::new(SimulatedMonitor {
            address: address.clone(),
        }))
    }
}

struct SimulatedMonitor {
    address: ServerAddress,
}

#[async_trait]
impl MonitorConnection for SimulatedMonitor {
    async fn hello(&mut self, _timeout: Duration) -> Result<Document, MongoError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let is_primary = self.address.to_string() == HOSTS[0];
        Ok(doc! {
            "ok": 1,
            "isWritablePrimary": is_primary,
            "secondary": !is_primary,
            "setName": "rs0",
            "hosts": HOSTS.to_vec(),
            "primary": HOSTS[0],
            "me": self.address.to_string(),
            "minWireVersion": 0,
            "maxWireVersion": 21,
            "logicalSessionTimeoutMinutes": 30,
        })
    }
}
