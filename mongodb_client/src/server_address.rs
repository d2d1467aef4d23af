use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ClientError;

pub const DEFAULT_PORT: u16 = 27017;

/// The `host:port` identity of a server. Hosts are lower-cased so the addresses reported by
/// different members of a replica set compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_lowercase(),
            port: port.unwrap_or(DEFAULT_PORT),
        }
    }

    /// Parses `host`, `host:port`, `[ipv6]` or `[ipv6]:port`.
    pub fn parse(address: &str) -> Result<Self, ClientError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ClientError::InvalidHost(address.to_string()));
        }

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, remainder) = rest
                .split_once(']')
                .ok_or_else(|| ClientError::InvalidHost(address.to_string()))?;
            let port = match remainder {
                "" => None,
                remainder => Some(
                    remainder
                        .strip_prefix(':')
                        .ok_or_else(|| ClientError::InvalidHost(address.to_string()))?,
                ),
            };
            (host, port)
        } else {
            match address.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() || host.contains('/') {
            return Err(ClientError::InvalidHost(address.to_string()));
        }

        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port != 0 => Some(port),
                _ => return Err(ClientError::InvalidHost(address.to_string())),
            },
            None => None,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServerAddress {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServerAddress> for String {
    fn from(address: ServerAddress) -> Self {
        address.to_string()
    }
}
