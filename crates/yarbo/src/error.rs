//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable exit code per category.

use miette::Diagnostic;
use thiserror::Error;

use yarbo_config::ConfigError;
use yarbo_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_CONTROLLER: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the broker at {endpoint}: {reason}")]
    #[diagnostic(
        code(yarbo::connection_failed),
        help(
            "Check that the robot is powered on and on the same network.\n\
             Omit --broker to let the CLI discover it: yarbo discover"
        )
    )]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Broker at {endpoint} refused the connection")]
    #[diagnostic(
        code(yarbo::connection_refused),
        help("Nothing is accepting MQTT on that address. Check --broker and --port.")
    )]
    ConnectionRefused { endpoint: String },

    #[error("Connection to the robot was lost")]
    #[diagnostic(code(yarbo::disconnected))]
    ConnectionLost,

    #[error("No Yarbo brokers found")]
    #[diagnostic(
        code(yarbo::no_devices),
        help(
            "Run on a network with a robot, scan a specific range with --subnet,\n\
             or connect directly with --broker and --sn."
        )
    )]
    NoDevices,

    // ── Protocol ─────────────────────────────────────────────────────
    #[error("Not the active controller: {reason}")]
    #[diagnostic(
        code(yarbo::not_controller),
        help(
            "The robot accepts commands from one controller at a time.\n\
             Close the mobile app (or any other client) and try again."
        )
    )]
    NotController { reason: String },

    #[error("Robot rejected {verb} (state {code}){}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    #[diagnostic(code(yarbo::rejected))]
    Rejected {
        verb: String,
        code: i64,
        message: Option<String>,
    },

    #[error("Malformed message from the robot: {message}")]
    #[diagnostic(code(yarbo::protocol))]
    Protocol { message: String },

    #[error("Connected, but no telemetry arrived within {seconds:.1}s")]
    #[diagnostic(
        code(yarbo::no_telemetry),
        help("The robot may be asleep. Increase --timeout or wake it from the app.")
    )]
    NoTelemetry { seconds: f64 },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("{operation} timed out after {millis}ms")]
    #[diagnostic(
        code(yarbo::timeout),
        help("Increase the timeout with --timeout or check the robot's Wi-Fi signal.")
    )]
    Timeout { operation: String, millis: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(yarbo::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(yarbo::profile_not_found),
        help("Available profiles: {available}\nConfig file: {path}")
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(yarbo::config))]
    Config { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(yarbo::render))]
    Render(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(yarbo::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionRefused { .. } | Self::ConnectionLost => {
                exit_code::CONNECTION
            }
            Self::NoDevices => exit_code::NOT_FOUND,
            Self::NotController { .. } => exit_code::NOT_CONTROLLER,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } | Self::NoTelemetry { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::Config { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { endpoint, reason } => {
                CliError::ConnectionFailed { endpoint, reason }
            }
            CoreError::Refused { endpoint, .. } => CliError::ConnectionRefused { endpoint },
            CoreError::NotConnected | CoreError::Disconnected | CoreError::SessionClosed => {
                CliError::ConnectionLost
            }
            CoreError::Timeout {
                operation,
                timeout_ms,
            } => CliError::Timeout {
                operation,
                millis: timeout_ms,
            },
            CoreError::Protocol { message } => CliError::Protocol { message },
            CoreError::InvalidPayload { message } => CliError::Validation {
                field: "payload".into(),
                reason: message,
            },
            CoreError::NotController { reason } => CliError::NotController { reason },
            CoreError::CommandRejected {
                verb,
                code,
                message,
            } => CliError::Rejected {
                verb,
                code,
                message,
            },
            CoreError::Config { message } => CliError::Config { message },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name, available } => CliError::ProfileNotFound {
                name,
                available,
                path: yarbo_config::config_path().display().to_string(),
            },
            other => CliError::Config {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Render(err.to_string())
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Render(err.to_string())
    }
}
