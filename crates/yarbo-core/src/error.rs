// ── Core error types ──
//
// Session-level errors from yarbo-core. Callers never see rumqttc or zlib
// failures directly; the `From<yarbo_api::Error>` impl folds wire-layer
// errors into this taxonomy.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to broker at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Broker at {endpoint} refused the connection: {reason}")]
    Refused { endpoint: String, reason: String },

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Connection to broker lost")]
    Disconnected,

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // ── Protocol errors ──────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Invalid command payload: {message}")]
    InvalidPayload { message: String },

    // ── Command errors ───────────────────────────────────────────────
    #[error("Not the active controller: {reason}")]
    NotController { reason: String },

    #[error("Device rejected {verb} with state {code}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    CommandRejected {
        verb: String,
        code: i64,
        message: Option<String>,
    },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Session is closed")]
    SessionClosed,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn timeout(operation: &str, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.to_owned(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub(crate) fn not_controller() -> Self {
        Self::NotController {
            reason: "controller role not acquired on this connection -- call acquire_controller()"
                .into(),
        }
    }

    /// Returns `true` for any failure to reach or keep the bus.
    ///
    /// Timeouts count: they are connection errors a caller may retry.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Refused { .. }
                | Self::NotConnected
                | Self::Disconnected
                | Self::Timeout { .. }
        )
    }

    /// Returns `true` if nothing responded within a bounded wait.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the bus actively refused or reset the connection,
    /// which usually means a wrong host or port rather than a flaky link.
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    /// Returns `true` if retrying after a backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionFailed { .. }
                | Self::NotConnected
                | Self::Disconnected
        )
    }

    /// Returns `true` if the controller lease is missing or was refused.
    pub fn is_not_controller(&self) -> bool {
        matches!(self, Self::NotController { .. })
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<yarbo_api::Error> for CoreError {
    fn from(err: yarbo_api::Error) -> Self {
        match err {
            yarbo_api::Error::Connect { endpoint, reason } => {
                CoreError::ConnectionFailed { endpoint, reason }
            }
            yarbo_api::Error::Refused { endpoint, reason } => CoreError::Refused { endpoint, reason },
            yarbo_api::Error::NotConnected => CoreError::NotConnected,
            yarbo_api::Error::Disconnected => CoreError::Disconnected,
            yarbo_api::Error::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation: operation.to_owned(),
                timeout_ms,
            },
            yarbo_api::Error::Client(e) => CoreError::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("MQTT client: {e}"),
            },
            yarbo_api::Error::Decode { message } => CoreError::Protocol { message },
            yarbo_api::Error::Encode { path, message } => CoreError::InvalidPayload {
                message: format!("{path}: {message}"),
            },
        }
    }
}
