/*!
mongodb_client is the discovery, selection and change stream core of a client for
MongoDB-compatible document databases.

This library requires tokio and async, and uses the actor pattern to maintain a single
view of the deployment per [`Client`]. Every topology change is funneled through one
actor task, which keeps the published [`TopologyDescription`] consistent and the
emitted [`SdamEvent`]s in the exact order the transitions happened.

The wire protocol is not part of this crate. A [`Transport`] implementation is handed
to the [`ClientBuilder`] and is used both by the per-server heartbeat monitors and by
the commands the client runs.

# Example
```rust,no_run
# use std::sync::Arc;
# use mongodb_client::{Client, ChangeStreamOptions, Transport};
# async fn example(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
let client = Client::builder()
    .set_connection_string("mongodb://db0.example.com,db1.example.com/?replicaSet=rs0")
    .set_transport(transport)
    .build()?;

let collection = client.database("inventory").collection("items");
let mut stream = collection
    .watch(Vec::new(), ChangeStreamOptions::default())
    .await?;

while let Some(event) = stream.next().await? {
    println!("{:?} on {:?}", event.operation_type, event.ns);
}
# Ok(())
# }
```

A blocking facade over the same core lives in [`sync`].
*/

mod bson_util;
mod change_stream;
mod client;
mod collection;
mod cursor;
mod database;
mod error;
mod events;
mod monitor;
mod namespace;
mod selection;
mod server_address;
mod server_description;
mod topology;
mod topology_description;
mod transport;

pub mod sync;

#[cfg(test)]
mod test_util;

pub use change_stream::*;
pub use client::*;
pub use collection::Collection;
pub use database::Database;
pub use error::*;
pub use events::*;
pub use namespace::Namespace;
pub use selection::{ReadPreference, SelectionCriteria, ServerPredicate};
pub use server_address::*;
pub use server_description::*;
pub use topology_description::*;
pub use transport::{MonitorConnection, Transport};

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
