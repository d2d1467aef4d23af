use std::{sync::Arc, time::Duration};

use bson::Document;
use tokio::{sync::mpsc, time::Instant};
use tracing::instrument;

use crate::{
    events::EventBus,
    server_description::next_round_trip_time,
    topology::{HeartbeatOptions, TopologyMessage},
    CommandError, Event, HeartbeatEvent, MongoError, MonitorConnection, ServerAddress,
    ServerDescription, Transport,
};

use super::MonitorMessage;

pub(crate) struct MonitorActor {
    address: ServerAddress,
    options: HeartbeatOptions,
    transport: Arc<dyn Transport>,
    connection: Option<Box<dyn MonitorConnection>>,
    average_round_trip_time: Option<Duration>,
    /// Whether the previous check reached the server. Decides if a failure gets a fast retry.
    was_available: bool,
    /// Check requests from the topology.
    receiver: mpsc::Receiver<MonitorMessage>,
    /// Results go back to the topology actor through here.
    topology: mpsc::Sender<TopologyMessage>,
    events: EventBus,
}

impl MonitorActor {
    pub(crate) fn new(
        address: ServerAddress,
        options: HeartbeatOptions,
        transport: Arc<dyn Transport>,
        topology: mpsc::Sender<TopologyMessage>,
        events: EventBus,
        receiver: mpsc::Receiver<MonitorMessage>,
    ) -> Self {
        Self {
            address,
            options,
            transport,
            connection: None,
            average_round_trip_time: None,
            was_available: false,
            receiver,
            topology,
            events,
        }
    }

    /// Runs one heartbeat and turns the outcome into a [`ServerDescription`]. Failures produce an
    /// Unknown description carrying the error.
    #[instrument(
        level = "debug",
        name = "Monitor - Check Server",
        skip(self),
        fields(address = %self.address)
    )]
    async fn check_server(&mut self) -> ServerDescription {
        self.events
            .emit(Event::Heartbeat(HeartbeatEvent::Started {
                address: self.address.clone(),
            }));

        let started = Instant::now();
        let result = self.hello().await;
        let duration = started.elapsed();

        match result {
            Ok(reply) => {
                tracing::trace!("Heartbeat succeeded in {:?}", duration);
                self.events
                    .emit(Event::Heartbeat(HeartbeatEvent::Succeeded {
                        address: self.address.clone(),
                        duration,
                        reply: reply.clone(),
                    }));
                let average = next_round_trip_time(self.average_round_trip_time, duration);
                self.average_round_trip_time = Some(average);
                ServerDescription::from_hello_reply(self.address.clone(), &reply, Some(average))
            }
            Err(e) => {
                tracing::debug!("Heartbeat failed: {}", e);
                self.events
                    .emit(Event::Heartbeat(HeartbeatEvent::Failed {
                        address: self.address.clone(),
                        duration,
                        failure: e.clone(),
                    }));
                self.connection = None;
                self.average_round_trip_time = None;
                ServerDescription::from_error(self.address.clone(), &e)
            }
        }
    }

    /// Sends `hello` on the monitoring connection, connecting first when needed.
    async fn hello(&mut self) -> Result<Document, MongoError> {
        let timeout = self.options.connect_timeout;

        if self.connection.is_none() {
            let connection = tokio::time::timeout(
                timeout,
                self.transport.connect_monitor(&self.address, timeout),
            )
            .await
            .map_err(|_| {
                MongoError::network(Some(self.address.clone()), "timed out while connecting")
            })??;
            self.connection = Some(connection);
        }
        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => {
                return Err(MongoError::network(
                    Some(self.address.clone()),
                    "monitoring connection unavailable",
                ))
            }
        };

        let reply = tokio::time::timeout(timeout, connection.hello(timeout))
            .await
            .map_err(|_| {
                MongoError::network(Some(self.address.clone()), "timed out waiting for hello")
            })??;

        match CommandError::from_reply(&reply) {
            Some(error) => Err(error.into()),
            None => Ok(reply),
        }
    }

    /// Waits until the next check is due. Returns `false` when the monitor should stop.
    async fn wait_for_next_check(&mut self, check_started: Instant, interval: Duration) -> bool {
        let earliest = check_started + self.options.min_heartbeat_frequency;
        tokio::select! {
            _ = tokio::time::sleep_until(check_started + interval) => true,
            msg = self.receiver.recv() => match msg {
                Some(MonitorMessage::RequestCheck) => {
                    tracing::trace!(address = %self.address, "Immediate check requested");
                    tokio::time::sleep_until(earliest).await;
                    true
                }
                None => false,
            },
        }
    }
}

#[instrument(
    level = "debug",
    name = "Running Monitor Actor",
    skip(actor),
    fields(address = %actor.address)
)]
pub(crate) async fn run_monitor_actor(mut actor: MonitorActor) {
    loop {
        let check_started = Instant::now();
        let description = actor.check_server().await;
        let available = description.is_available();

        if actor
            .topology
            .send(TopologyMessage::UpdateServer(description))
            .await
            .is_err()
        {
            tracing::debug!("Topology is gone, stopping monitor");
            break;
        }

        // A server that was reachable a moment ago gets one quick second chance.
        let interval = if !available && actor.was_available {
            actor.options.min_heartbeat_frequency
        } else {
            actor.options.heartbeat_frequency
        };
        actor.was_available = available;

        if !actor.wait_for_next_check(check_started, interval).await {
            break;
        }
    }
}
