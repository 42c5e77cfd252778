//! Protocol layer between `yarbo-api` and user-facing tools (CLI, scripts).
//!
//! - **[`Session`]**: One broker link, the `get_controller` handshake, and
//!   the controller lease that gates every device-mutating command.
//!   [`get_status()`](Session::get_status) waits for a single telemetry
//!   frame; [`watch_telemetry()`](Session::watch_telemetry) streams them.
//!
//! - **[`Discovery`]**: Finds brokers on the local network: targeted TCP
//!   probes, a passive topic sniff to learn the serial, and role
//!   classification so callers can prefer the base station.
//!
//! - **[`LocalClient`]**: Composition root exposing lights, buzzer, chute,
//!   plans and raw commands, plus the reconnect-with-backoff policy.
//!
//! - **[`Command`]**: Typed device commands, each mapped to a
//!   [`CommandEnvelope`] of verb + payload.

pub mod client;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod reconnect;
pub mod session;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::LocalClient;
pub use command::requests::LightState;
pub use command::{Command, CommandEnvelope, CommandResult};
pub use config::{ClientConfig, DiscoveryConfig, ReconnectConfig, SessionConfig};
pub use discovery::{DiscoveredDevice, Discovery, Role, connection_order};
pub use error::CoreError;
pub use session::{ControllerLease, Session, SessionState};
pub use telemetry::{DeviceStatus, PlanProgress, TelemetryFrame};

// The wire types callers need to build sessions.
pub use yarbo_api::{Encoding, Endpoint, MqttTransport, Payload, Transport, TransportConfig};
