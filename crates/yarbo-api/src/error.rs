use thiserror::Error;

/// Top-level error type for the `yarbo-api` crate.
///
/// Covers every failure mode of the wire layer: reaching the broker,
/// bounded waits, the MQTT client request queue, and the payload codec.
/// `yarbo-core` maps these into the session-level taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The broker could not be reached (DNS, unroutable host, I/O failure).
    #[error("Cannot connect to broker at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The broker (or the host) actively refused or reset the connection.
    #[error("Broker at {endpoint} refused the connection: {reason}")]
    Refused { endpoint: String, reason: String },

    /// An operation that needs a live link was attempted without one.
    #[error("Not connected to broker -- call connect() first")]
    NotConnected,

    /// The link dropped while an operation was waiting on it.
    #[error("Connection to broker lost")]
    Disconnected,

    // ── Timing ──────────────────────────────────────────────────────
    /// A bounded wait elapsed without a response.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Client ──────────────────────────────────────────────────────
    /// The MQTT client request queue rejected a request (event loop gone).
    #[error("MQTT client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    // ── Codec ───────────────────────────────────────────────────────
    /// Bytes were not valid (optionally compressed) JSON objects.
    #[error("Payload decode failed: {message}")]
    Decode { message: String },

    /// A payload could not be serialized.
    #[error("Payload encode failed at {path}: {message}")]
    Encode { path: String, message: String },
}

impl Error {
    /// Build a [`Timeout`](Self::Timeout) from the elapsed bound.
    pub fn timeout(operation: &'static str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` if nothing responded within a bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the peer actively refused or reset the connection.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    /// Returns `true` for any failure to reach or keep the bus.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::Refused { .. }
                | Self::NotConnected
                | Self::Disconnected
                | Self::Timeout { .. }
                | Self::Client(_)
        )
    }

    /// Returns `true` if this is a transient error worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connect { .. } | Self::Disconnected | Self::NotConnected
        )
    }
}
