// ── Local client ──
//
// Composition root for talking to one robot over its local broker:
// typed device operations on top of `Session`, plus the reconnect policy
// the session leaves to its owner.

use std::time::Duration;

use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use yarbo_api::codec::Payload;
use yarbo_api::{Endpoint, MqttTransport, Transport};

use crate::command::{Command, CommandResult, LightState};
use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::CoreError;
use crate::reconnect::{calculate_backoff, retries_exhausted};
use crate::session::{ControllerLease, Session, SessionState};
use crate::telemetry::{DeviceStatus, TelemetryFrame};

/// High-level handle to one robot.
///
/// Cheaply cloneable; clones share one session.
pub struct LocalClient<T: Transport = MqttTransport> {
    session: Session<T>,
    reconnect: ReconnectConfig,
}

impl<T: Transport> Clone for LocalClient<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            reconnect: self.reconnect.clone(),
        }
    }
}

impl LocalClient<MqttTransport> {
    /// Build a client over a fresh MQTT transport. Does NOT connect.
    pub fn new(config: ClientConfig) -> Result<Self, CoreError> {
        let transport = MqttTransport::new(config.transport.clone());
        Self::with_transport(transport, config)
    }

    /// Try `endpoints` in order and return the first client that connects.
    ///
    /// Pass the output of [`connection_order`](crate::connection_order) to
    /// get base-station-first fallback. Endpoints without a serial borrow
    /// the one from `config.endpoint`.
    pub async fn connect_first(
        endpoints: &[Endpoint],
        config: ClientConfig,
    ) -> Result<Self, CoreError> {
        let mut last_err = None;
        for endpoint in endpoints {
            let endpoint = match (&endpoint.serial, &config.endpoint.serial) {
                (None, Some(serial)) => endpoint.clone().with_serial(serial.clone()),
                _ => endpoint.clone(),
            };
            let attempt = ClientConfig {
                endpoint: endpoint.clone(),
                ..config.clone()
            };
            let client = match Self::new(attempt) {
                Ok(client) => client,
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "skipping endpoint");
                    last_err = Some(e);
                    continue;
                }
            };
            match client.connect().await {
                Ok(()) => return Ok(client),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "endpoint failed, trying next");
                    client.close().await;
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::ConnectionFailed {
            endpoint: String::new(),
            reason: "no endpoints to try".into(),
        }))
    }
}

impl<T: Transport> LocalClient<T> {
    pub fn with_transport(transport: T, config: ClientConfig) -> Result<Self, CoreError> {
        let session = Session::new(transport, config.endpoint, config.session)?;
        Ok(Self {
            session,
            reconnect: config.reconnect,
        })
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.session.endpoint()
    }

    pub fn serial(&self) -> &str {
        self.session.serial()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_controller(&self) -> bool {
        self.session.is_controller()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    pub async fn connect(&self) -> Result<(), CoreError> {
        self.session.connect().await
    }

    pub async fn acquire_controller(&self) -> Result<ControllerLease, CoreError> {
        self.session.acquire_controller().await
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Connect, retrying retryable failures with exponential backoff.
    ///
    /// Refusals and other non-retryable errors return at once. Cancelling
    /// `cancel` returns the most recent error.
    pub async fn connect_with_retry(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        let mut attempt: u32 = 0;
        loop {
            let err = match self.session.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            if retries_exhausted(attempt, &self.reconnect) {
                warn!(attempts = attempt + 1, error = %err, "giving up on broker");
                return Err(err);
            }

            let delay = calculate_backoff(attempt, &self.reconnect);
            warn!(error = %err, attempt, ?delay, "connect failed, retrying");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(err),
                () = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Reconnect whenever the session drops, until `cancel` fires or the
    /// session is closed.
    ///
    /// The session re-runs the controller handshake on every reconnect
    /// when `auto_controller` is set. Returns the error that made a
    /// reconnect impossible.
    pub async fn run_reconnect_supervisor(&self, cancel: CancellationToken) -> Result<(), CoreError> {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = self.session.wait_for_disconnect() => {}
            }
            if self.session.state() == SessionState::Closed {
                return Ok(());
            }

            info!(endpoint = %self.endpoint(), "session down, reconnecting");
            match self.connect_with_retry(&cancel).await {
                Ok(()) => info!(endpoint = %self.endpoint(), "session restored"),
                Err(_) if cancel.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    // ── Lights & sound ───────────────────────────────────────────

    pub async fn set_lights(&self, state: LightState) -> Result<(), CoreError> {
        self.session.send(Command::SetLights(state)).await
    }

    pub async fn lights_on(&self) -> Result<(), CoreError> {
        self.set_lights(LightState::all_on()).await
    }

    pub async fn lights_off(&self) -> Result<(), CoreError> {
        self.set_lights(LightState::all_off()).await
    }

    pub async fn lights_body(&self) -> Result<(), CoreError> {
        self.set_lights(LightState::body_only()).await
    }

    pub async fn head_light(&self, on: bool) -> Result<(), CoreError> {
        self.session.send(Command::HeadLight { on }).await
    }

    pub async fn roof_lights(&self, on: bool) -> Result<(), CoreError> {
        self.session.send(Command::RoofLights { on }).await
    }

    /// `true` plays the buzzer, `false` stops it.
    pub async fn buzzer(&self, state: bool) -> Result<(), CoreError> {
        self.session.send(Command::Buzzer { state }).await
    }

    // ── Actuators ────────────────────────────────────────────────

    /// Rotate the snow chute. Positive turns right, negative left.
    pub async fn chute(&self, velocity: i32) -> Result<(), CoreError> {
        self.session.send(Command::Chute { velocity }).await
    }

    // ── Plans ────────────────────────────────────────────────────

    pub async fn start_plan(&self, plan_id: impl Into<String>) -> Result<CommandResult, CoreError> {
        self.request(Command::StartPlan {
            plan_id: plan_id.into(),
        })
        .await
    }

    pub async fn stop_plan(&self) -> Result<CommandResult, CoreError> {
        self.request(Command::StopPlan).await
    }

    pub async fn pause_plan(&self) -> Result<CommandResult, CoreError> {
        self.request(Command::PausePlan).await
    }

    pub async fn resume_plan(&self) -> Result<CommandResult, CoreError> {
        self.request(Command::ResumePlan).await
    }

    pub async fn return_to_dock(&self) -> Result<CommandResult, CoreError> {
        self.request(Command::ReturnToDock).await
    }

    // ── Safety ───────────────────────────────────────────────────

    pub async fn emergency_stop(&self) -> Result<(), CoreError> {
        self.session.send(Command::EmergencyStop).await
    }

    pub async fn emergency_unlock(&self) -> Result<(), CoreError> {
        self.session.send(Command::EmergencyUnlock).await
    }

    // ── Escape hatch ─────────────────────────────────────────────

    pub async fn publish_raw(
        &self,
        verb: impl Into<String>,
        payload: Payload,
    ) -> Result<(), CoreError> {
        self.session.publish_raw(verb, payload).await
    }

    /// Send any command, waiting for a `data_feedback` reply when the
    /// verb is known to produce one.
    pub async fn execute(&self, command: Command) -> Result<Option<CommandResult>, CoreError> {
        if command.expects_ack() {
            self.request(command).await.map(Some)
        } else {
            self.session.send(command).await.map(|()| None)
        }
    }

    async fn request(&self, command: Command) -> Result<CommandResult, CoreError> {
        let timeout = self.session.config().command_timeout;
        self.session.request(command, timeout).await
    }

    // ── Telemetry ────────────────────────────────────────────────

    pub async fn get_status(&self, timeout: Duration) -> Result<Option<TelemetryFrame>, CoreError> {
        self.session.get_status(timeout).await
    }

    /// [`get_status`](Self::get_status) viewed through [`DeviceStatus`].
    pub async fn get_device_status(
        &self,
        timeout: Duration,
    ) -> Result<Option<DeviceStatus>, CoreError> {
        Ok(self.get_status(timeout).await?.map(|frame| frame.status()))
    }

    pub async fn watch_telemetry(
        &self,
    ) -> Result<impl Stream<Item = TelemetryFrame> + Send + 'static, CoreError> {
        self.session.watch_telemetry().await
    }

    pub async fn watch_feedback(
        &self,
    ) -> Result<impl Stream<Item = TelemetryFrame> + Send + 'static, CoreError> {
        self.session.watch_feedback().await
    }
}
