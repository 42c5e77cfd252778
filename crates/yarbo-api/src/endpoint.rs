use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// Conventional plaintext MQTT port used by the on-board broker.
pub const DEFAULT_PORT: u16 = 1883;

/// One reachable broker, plus the device serial once it has been learned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            serial: None,
        }
    }

    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        let serial = serial.into();
        self.serial = (!serial.is_empty()).then_some(serial);
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same broker, ignoring the learned serial.
    pub fn same_broker(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// Socket address if the host is an IPv4 literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| SocketAddr::from((ip, self.port)))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
