// ── Protocol session ──
//
// One broker link, the `get_controller` handshake, and the controller
// lease that gates device-mutating commands. The session never retries
// a failed connect on its own; it publishes `Disconnected` through its
// state channel and lets the caller decide.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use yarbo_api::codec;
use yarbo_api::topic::{self, leaf, verb};
use yarbo_api::{Endpoint, InboundFeed, LinkState, TopicBuilder, Transport};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::SessionConfig;
use crate::error::CoreError;
use crate::telemetry::{PlanProgress, TelemetryFrame};

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of a [`Session`], observable via [`Session::watch_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ControllerAcquired,
    /// Terminal. Reached only through [`Session::close`].
    Closed,
}

impl SessionState {
    /// `true` while the broker link is believed to be up.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::ControllerAcquired)
    }
}

/// Proof that the device granted this client the controller role.
///
/// Valid only for the link generation it was acquired on; any reconnect
/// invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerLease {
    pub generation: u64,
    pub acquired_at: DateTime<Utc>,
}

// ── Session ──────────────────────────────────────────────────────

/// A protocol session with one robot.
///
/// Cheaply cloneable; clones share the transport, state and lease.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<T> {
    transport: T,
    endpoint: Endpoint,
    topics: TopicBuilder,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    lease: Mutex<Option<ControllerLease>>,
    cancel: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
    /// Serializes handshakes so two callers never interleave acks.
    handshake: tokio::sync::Mutex<()>,
}

impl<T: Transport> Session<T> {
    /// Build a session. Does NOT connect -- call [`connect()`](Self::connect).
    ///
    /// The endpoint must carry the device serial; every topic is scoped by it.
    pub fn new(transport: T, endpoint: Endpoint, config: SessionConfig) -> Result<Self, CoreError> {
        let Some(serial) = endpoint.serial.clone() else {
            return Err(CoreError::Config {
                message: format!("endpoint {endpoint} has no device serial"),
            });
        };
        let topics = TopicBuilder::new(config.namespace.clone(), serial);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            inner: Arc::new(SessionInner {
                transport,
                endpoint,
                topics,
                config,
                state,
                lease: Mutex::new(None),
                cancel: CancellationToken::new(),
                monitor: Mutex::new(None),
                handshake: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn serial(&self) -> &str {
        self.inner.topics.serial()
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.inner.topics
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to state changes. Disconnects show up here as
    /// `Disconnected`.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Resolve once the session is `Disconnected` or `Closed`.
    pub async fn wait_for_disconnect(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, SessionState::Disconnected | SessionState::Closed))
            .await;
    }

    /// The current lease, if it is still valid for the live link.
    pub fn lease(&self) -> Option<ControllerLease> {
        let generation = self.link_generation()?;
        self.lease_slot()
            .filter(|lease| lease.generation == generation)
    }

    pub fn is_controller(&self) -> bool {
        self.lease().is_some()
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the broker, then run the controller handshake unless
    /// `auto_controller` is off.
    ///
    /// A failed handshake is not fatal while the link stays up: the
    /// session stays `Connected`, telemetry keeps working, and privileged
    /// commands fail with `NotController` until
    /// [`acquire_controller()`](Self::acquire_controller) succeeds.
    ///
    /// Calling this on a live session keeps the current link, state and
    /// lease.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.ensure_open()?;
        let inner = &self.inner;

        for leaf in &inner.config.feedback_leaves {
            inner.transport.subscribe(&inner.topics.feedback(leaf)).await?;
        }

        let live = self.link_generation();
        if live.is_none() {
            self.stop_monitor();
            self.set_state(SessionState::Connecting);

            if let Err(e) = inner
                .transport
                .connect(&inner.endpoint, inner.config.connect_timeout)
                .await
            {
                self.set_state(SessionState::Disconnected);
                return Err(e.into());
            }
        }

        let Some(generation) = self.link_generation() else {
            self.set_state(SessionState::Disconnected);
            return Err(CoreError::Disconnected);
        };

        let still_leased = {
            let mut lease = self.lock_lease();
            if lease.is_some_and(|l| l.generation != generation) {
                *lease = None;
            }
            lease.is_some()
        };
        self.set_state(if still_leased {
            SessionState::ControllerAcquired
        } else {
            SessionState::Connected
        });
        if live != Some(generation) || !self.monitor_running() {
            self.spawn_monitor(generation);
            info!(endpoint = %inner.endpoint, serial = %self.serial(), generation, "connected to broker");
        }

        if inner.config.auto_controller && !still_leased {
            match self.acquire_controller().await {
                Ok(_) => {}
                Err(e)
                    if matches!(e, CoreError::SessionClosed)
                        || self.link_generation() != Some(generation) =>
                {
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "controller handshake failed; continuing read-only"),
            }
        }
        Ok(())
    }

    /// Drop the link. The session can be connected again afterwards.
    ///
    /// Any in-flight handshake, ack wait or status query resolves with
    /// `Disconnected`.
    pub async fn disconnect(&self) {
        self.stop_monitor();
        self.lock_lease().take();
        self.inner.transport.disconnect().await;
        self.set_state(SessionState::Disconnected);
        debug!("session disconnected");
    }

    /// Terminal shutdown. Ends every telemetry stream and fails every
    /// later call with `SessionClosed`.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.stop_monitor();
        self.lock_lease().take();
        self.inner.transport.disconnect().await;
        self.inner.state.send_replace(SessionState::Closed);
        debug!("session closed");
    }

    // ── Controller handshake ─────────────────────────────────────

    /// Publish `get_controller` and wait for the device's verdict.
    ///
    /// Safe to call repeatedly; each call performs a fresh handshake.
    pub async fn acquire_controller(&self) -> Result<ControllerLease, CoreError> {
        self.ensure_open()?;
        let _guard = self.inner.handshake.lock().await;
        let generation = self.link_generation().ok_or(CoreError::NotConnected)?;

        let mut feed = self.ack_feed().await?;
        self.publish_envelope(&CommandEnvelope::get_controller())
            .await?;
        let reply = self
            .await_ack(&mut feed, verb::GET_CONTROLLER, self.inner.config.command_timeout)
            .await?;

        if !reply.is_success() {
            self.lock_lease().take();
            self.transition(SessionState::ControllerAcquired, SessionState::Connected);
            warn!(state = reply.state, "device refused controller role");
            return Err(CoreError::NotController {
                reason: format!("device answered get_controller with state {}", reply.state),
            });
        }

        if self.link_generation() != Some(generation) {
            return Err(CoreError::Disconnected);
        }
        let lease = ControllerLease {
            generation,
            acquired_at: Utc::now(),
        };
        *self.lock_lease() = Some(lease);
        self.transition(SessionState::Connected, SessionState::ControllerAcquired);
        info!(serial = %self.serial(), generation, "controller role acquired");
        Ok(lease)
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Publish a privileged command. Completes once the broker accepted
    /// the publish; the device sends no per-command ack for most verbs.
    ///
    /// Fails with `NotController` and touches nothing on the network when
    /// no valid lease is held.
    pub async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.ensure_controller()?;
        let envelope = command.into_envelope()?;
        self.publish_envelope(&envelope).await
    }

    /// Publish a privileged command and wait for its `data_feedback` reply.
    ///
    /// A non-zero `state` in the reply is `CommandRejected`.
    pub async fn request(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        self.ensure_open()?;
        self.ensure_controller()?;
        let envelope = command.into_envelope()?;

        let mut feed = self.ack_feed().await?;
        self.publish_envelope(&envelope).await?;
        let reply = self.await_ack(&mut feed, &envelope.verb, timeout).await?;
        reply.into_result()
    }

    /// Escape hatch: any verb, any JSON object body.
    pub async fn publish_raw(
        &self,
        verb: impl Into<String>,
        payload: codec::Payload,
    ) -> Result<(), CoreError> {
        self.send(Command::Raw {
            verb: verb.into(),
            payload,
        })
        .await
    }

    // ── Telemetry ────────────────────────────────────────────────

    /// Wait for one `DeviceMSG` frame.
    ///
    /// `Ok(None)` when nothing arrives within `timeout`; a frame that
    /// fails to decode is a `Protocol` error.
    pub async fn get_status(&self, timeout: Duration) -> Result<Option<TelemetryFrame>, CoreError> {
        self.ensure_open()?;
        self.ensure_connected()?;
        let mut feed = self.feed_for(leaf::DEVICE_MSG).await?;

        let recv = async {
            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => Err(CoreError::SessionClosed),
                msg = feed.recv() => msg.ok_or(CoreError::Disconnected),
            }
        };
        match tokio::time::timeout(timeout, recv).await {
            Ok(Ok(msg)) => TelemetryFrame::decode(&msg).map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!(?timeout, "no telemetry within timeout");
                Ok(None)
            }
        }
    }

    /// Endless stream of decoded `DeviceMSG` frames, each carrying the
    /// latest `plan_feedback` progress seen on the same watch.
    ///
    /// Malformed frames are logged and skipped. The stream ends when the
    /// link drops or the session closes.
    pub async fn watch_telemetry(
        &self,
    ) -> Result<impl Stream<Item = TelemetryFrame> + Send + 'static, CoreError> {
        self.ensure_open()?;
        self.ensure_connected()?;
        for name in TELEMETRY_LEAVES {
            self.inner
                .transport
                .subscribe(&self.inner.topics.feedback(name))
                .await?;
        }
        // One feed for both leaves keeps plan updates in arrival order.
        let feed = self.inner.transport.inbound(&self.inner.topics.all_feedback());
        let frames = frame_stream(feed, TELEMETRY_LEAVES, self.inner.cancel.clone());
        Ok(merge_plan(frames))
    }

    /// Like [`watch_telemetry`](Self::watch_telemetry) but covering every
    /// feedback leaf, heartbeat included.
    pub async fn watch_feedback(
        &self,
    ) -> Result<impl Stream<Item = TelemetryFrame> + Send + 'static, CoreError> {
        self.ensure_open()?;
        self.ensure_connected()?;
        let filter = self.inner.topics.all_feedback();
        self.inner.transport.subscribe(&filter).await?;
        let feed = self.inner.transport.inbound(&filter);
        Ok(frame_stream(feed, &[], self.inner.cancel.clone()))
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.link_generation().is_none() {
            return Err(CoreError::NotConnected);
        }
        Ok(())
    }

    fn ensure_controller(&self) -> Result<(), CoreError> {
        if self.state() != SessionState::ControllerAcquired || self.lease().is_none() {
            return Err(CoreError::not_controller());
        }
        Ok(())
    }

    fn link_generation(&self) -> Option<u64> {
        self.inner.transport.link().borrow().generation()
    }

    fn lock_lease(&self) -> MutexGuard<'_, Option<ControllerLease>> {
        self.inner
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lease_slot(&self) -> Option<ControllerLease> {
        *self.lock_lease()
    }

    /// Move to `next` unless the session is closed.
    fn set_state(&self, next: SessionState) {
        self.inner.state.send_if_modified(|current| {
            if *current == SessionState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Move `from` -> `to`; a no-op from any other state.
    fn transition(&self, from: SessionState, to: SessionState) {
        self.inner.state.send_if_modified(|current| {
            if *current != from {
                return false;
            }
            *current = to;
            true
        });
    }

    async fn feed_for(&self, leaf: &str) -> Result<InboundFeed, CoreError> {
        let topic = self.inner.topics.feedback(leaf);
        self.inner.transport.subscribe(&topic).await?;
        Ok(self.inner.transport.inbound(&topic))
    }

    /// Register the ack feed before publishing so the reply can't race us.
    async fn ack_feed(&self) -> Result<InboundFeed, CoreError> {
        self.feed_for(leaf::DATA_FEEDBACK).await
    }

    async fn publish_envelope(&self, envelope: &CommandEnvelope) -> Result<(), CoreError> {
        let topic = self.inner.topics.command(&envelope.verb);
        let bytes = codec::encode(&envelope.payload)?;
        self.inner.transport.publish(&topic, bytes).await?;
        debug!(topic = %topic, "published command");
        Ok(())
    }

    /// Wait for the `data_feedback` reply whose `topic` names `verb`.
    ///
    /// Replies for other verbs are skipped; an undecodable frame is a
    /// `Protocol` error.
    async fn await_ack(
        &self,
        feed: &mut InboundFeed,
        verb: &str,
        timeout: Duration,
    ) -> Result<CommandResult, CoreError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            let msg = tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => return Err(CoreError::SessionClosed),
                msg = feed.recv() => msg.ok_or(CoreError::Disconnected)?,
                () = &mut deadline => return Err(CoreError::timeout(verb, timeout)),
            };

            let frame = TelemetryFrame::decode(&msg)?;
            if frame.payload.get("topic").and_then(Value::as_str) != Some(verb) {
                debug!(verb, "skipping feedback for another verb");
                continue;
            }
            return CommandResult::from_payload(frame.payload);
        }
    }

    fn spawn_monitor(&self, generation: u64) {
        let link = self.inner.transport.link();
        let cancel = self.inner.cancel.clone();
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(monitor_link(link, generation, cancel, weak));
        if let Some(old) = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            old.abort();
        }
    }

    fn monitor_running(&self) -> bool {
        self.inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop_monitor(&self) {
        if let Some(handle) = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<T> SessionInner<T> {
    fn link_lost(&self, generation: u64) {
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_if(|lease| lease.generation == generation);
        self.state.send_if_modified(|current| {
            if matches!(current, SessionState::Connected | SessionState::ControllerAcquired) {
                *current = SessionState::Disconnected;
                return true;
            }
            false
        });
        info!(generation, "broker link lost; controller lease cleared");
    }
}

impl<T> Drop for SessionInner<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Watch the transport's link until `generation` is no longer live.
async fn monitor_link<T>(
    mut link: watch::Receiver<LinkState>,
    generation: u64,
    cancel: CancellationToken,
    session: Weak<SessionInner<T>>,
) {
    loop {
        if link.borrow_and_update().generation() != Some(generation) {
            if let Some(inner) = session.upgrade() {
                inner.link_lost(generation);
            }
            return;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            changed = link.changed() => {
                if changed.is_err() {
                    if let Some(inner) = session.upgrade() {
                        inner.link_lost(generation);
                    }
                    return;
                }
            }
        }
    }
}

const TELEMETRY_LEAVES: &[&str] = &[leaf::DEVICE_MSG, leaf::PLAN_FEEDBACK];

/// Decode a feed into frames, dropping (and logging) anything malformed.
///
/// An empty `leaves` keeps every leaf.
fn frame_stream(
    mut feed: InboundFeed,
    leaves: &'static [&'static str],
    cancel: CancellationToken,
) -> impl Stream<Item = TelemetryFrame> + Send + 'static {
    async_stream::stream! {
        loop {
            let msg = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = feed.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let name = topic::leaf_of(&msg.topic);
            if !leaves.is_empty() && !leaves.iter().any(|l| *l == name) {
                continue;
            }
            match TelemetryFrame::decode(&msg) {
                Ok(frame) => yield frame,
                Err(e) => warn!(topic = %msg.topic, error = %e, "dropping malformed frame"),
            }
        }
    }
}

/// Swallow `plan_feedback` frames and attach the latest one to every
/// `DeviceMSG` frame after it.
fn merge_plan(
    frames: impl Stream<Item = TelemetryFrame> + Send + 'static,
) -> impl Stream<Item = TelemetryFrame> + Send + 'static {
    async_stream::stream! {
        let mut plan: Option<PlanProgress> = None;
        for await frame in frames {
            if frame.is_device_msg() {
                yield frame.with_plan(plan.clone());
            } else if frame.leaf == leaf::PLAN_FEEDBACK {
                plan = PlanProgress::from_payload(&frame.payload);
                debug!(?plan, "plan progress updated");
            }
        }
    }
}
