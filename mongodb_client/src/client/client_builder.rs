use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use tracing::instrument;

use crate::{Client, ClientError, ClientOptions, EventHandler, ServerAddress, Transport};

/// Configures and creates a [`Client`].
///
/// Options are layered: a config file first, then a connection string, then the individual
/// `set_*` calls, each overriding what came before.
#[derive(Default)]
pub struct ClientBuilder {
    config_file: Option<PathBuf>,
    connection_string: Option<String>,
    hosts: Vec<String>,
    replica_set: Option<String>,
    direct_connection: Option<bool>,
    load_balanced: Option<bool>,
    heartbeat_frequency: Option<Duration>,
    min_heartbeat_frequency: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    local_threshold: Option<Duration>,
    connect_timeout: Option<Duration>,
    app_name: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    event_handlers: Vec<Arc<dyn EventHandler>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    pub fn set_connection_string(mut self, connection_string: &str) -> Self {
        self.connection_string = Some(connection_string.to_string());
        self
    }

    pub fn set_hosts<T>(mut self, hosts: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for host in hosts {
            self.hosts.push(host.as_ref().to_string());
        }
        self
    }

    pub fn set_replica_set_name(mut self, replica_set: &str) -> Self {
        self.replica_set = Some(replica_set.to_string());
        self
    }

    pub fn set_direct_connection(mut self, direct_connection: bool) -> Self {
        self.direct_connection = Some(direct_connection);
        self
    }

    pub fn set_load_balanced(mut self, load_balanced: bool) -> Self {
        self.load_balanced = Some(load_balanced);
        self
    }

    pub fn set_heartbeat_frequency(mut self, heartbeat_frequency: Duration) -> Self {
        self.heartbeat_frequency = Some(heartbeat_frequency);
        self
    }

    pub fn set_min_heartbeat_frequency(mut self, min_heartbeat_frequency: Duration) -> Self {
        self.min_heartbeat_frequency = Some(min_heartbeat_frequency);
        self
    }

    pub fn set_server_selection_timeout(mut self, server_selection_timeout: Duration) -> Self {
        self.server_selection_timeout = Some(server_selection_timeout);
        self
    }

    pub fn set_local_threshold(mut self, local_threshold: Duration) -> Self {
        self.local_threshold = Some(local_threshold);
        self
    }

    pub fn set_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    pub fn set_app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    pub fn set_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers a handler that sees every event, starting with `TopologyOpening`.
    pub fn add_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    /// Resolves the layered configuration into validated [`ClientOptions`].
    pub fn options(&self) -> Result<ClientOptions, ClientError> {
        let mut options = match &self.config_file {
            Some(path) => ClientOptions::from_file(path)?,
            None => ClientOptions::default(),
        };

        if let Some(connection_string) = &self.connection_string {
            options.apply_connection_string(connection_string)?;
        }

        if !self.hosts.is_empty() {
            options.hosts = self
                .hosts
                .iter()
                .map(|host| ServerAddress::parse(host))
                .collect::<Result<Vec<_>, _>>()?;
        }
        if let Some(replica_set) = &self.replica_set {
            options.replica_set = Some(replica_set.clone());
        }
        if self.direct_connection.is_some() {
            options.direct_connection = self.direct_connection;
        }
        if self.load_balanced.is_some() {
            options.load_balanced = self.load_balanced;
        }
        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }
        options.heartbeat_frequency = self
            .heartbeat_frequency
            .unwrap_or(options.heartbeat_frequency);
        options.min_heartbeat_frequency = self
            .min_heartbeat_frequency
            .unwrap_or(options.min_heartbeat_frequency);
        options.server_selection_timeout = self
            .server_selection_timeout
            .unwrap_or(options.server_selection_timeout);
        options.local_threshold = self.local_threshold.unwrap_or(options.local_threshold);
        options.connect_timeout = self.connect_timeout.unwrap_or(options.connect_timeout);

        options.validate()?;
        Ok(options)
    }

    /// Starts a new topology actor and its monitors and returns a handle to it.
    ///
    /// Each call creates a new, independent client, so a configured builder can be used as a
    /// template. Must be called from within a tokio runtime.
    #[instrument(level = "debug", name = "Build ClientBuilder", skip(self))]
    pub fn build(&self) -> Result<Client, ClientError> {
        let options = self.options().map_err(|e| {
            tracing::error!("Invalid client configuration: {}", e);
            e
        })?;

        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => {
                tracing::error!("No transport was supplied");
                return Err(ClientError::MissingTransport);
            }
        };

        tracing::trace!("Client options: {:?}", &options);
        Ok(Client::new(options, transport, self.event_handlers.clone()))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config_file", &self.config_file)
            .field("connection_string", &self.connection_string)
            .field("hosts", &self.hosts)
            .field("replica_set", &self.replica_set)
            .field("direct_connection", &self.direct_connection)
            .field("load_balanced", &self.load_balanced)
            .field("app_name", &self.app_name)
            .field("transport", &self.transport.is_some())
            .field("event_handlers", &self.event_handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use std::io::Write;

    use super::*;
    use crate::{test_util::MockTransport, TopologyType};

    fn transport() -> Arc<dyn Transport> {
        Arc::new(MockTransport::new())
    }

    #[tokio::test]
    async fn clientbuilder_build_succeeds_for_valid_configuration() {
        // Arrange
        let hosts = ["localhost:27017"];

        // Act
        let client = ClientBuilder::new()
            .set_hosts(&hosts)
            .set_transport(transport())
            .build();

        // Assert
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn clientbuilder_build_fails_if_no_hosts() {
        let client = ClientBuilder::new().set_transport(transport()).build();

        assert!(matches!(client, Err(ClientError::MissingHostsError)));
    }

    #[tokio::test]
    async fn clientbuilder_build_fails_if_no_transport() {
        let client = ClientBuilder::new().set_hosts(&["localhost"]).build();

        assert!(matches!(client, Err(ClientError::MissingTransport)));
    }

    #[test]
    fn clientbuilder_fails_for_invalid_hosts() {
        let options = ClientBuilder::new().set_hosts(&["localhost:notaport"]).options();

        assert!(matches!(options, Err(ClientError::InvalidHost(_))));
    }

    #[test]
    fn setters_override_the_connection_string() {
        // Arrange
        let builder = ClientBuilder::new()
            .set_connection_string("mongodb://a,b/?replicaSet=rs0&localThresholdMS=50")
            .set_replica_set_name("rs1")
            .set_local_threshold(Duration::from_millis(5));

        // Act
        let options = builder.options().unwrap();

        // Assert
        assert_eq!(options.hosts.len(), 2);
        assert_eq!(options.replica_set.as_deref(), Some("rs1"));
        assert_eq!(options.local_threshold, Duration::from_millis(5));
    }

    #[test]
    fn connection_string_overrides_the_config_file() {
        // Arrange
        let path = std::env::temp_dir().join(format!("mongodb_client_{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "hosts": ["file-host:27017"], "heartbeatFrequencyMS": 20000, "directConnection": true }}"#
        )
        .unwrap();

        // Act
        let options = ClientBuilder::new()
            .set_config_file(&path)
            .set_connection_string("mongodb://cs-host/?heartbeatFrequencyMS=15000")
            .options();
        std::fs::remove_file(&path).unwrap();

        // Assert
        let options = options.unwrap();
        assert_eq!(options.hosts, vec![ServerAddress::new("cs-host", None)]);
        assert_eq!(options.heartbeat_frequency, Duration::from_secs(15));
        assert_eq!(options.initial_topology_type(), TopologyType::Single);
    }

    #[test]
    fn clientbuilder_fails_for_invalid_config_file() {
        let options = ClientBuilder::new()
            .set_config_file("../README.md")
            .options();

        assert!(matches!(options, Err(ClientError::UnexpectedError(_))));
    }
}
