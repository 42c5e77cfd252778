//! MQTT transport backed by `rumqttc`.
//!
//! `rumqttc` drives the socket from an [`EventLoop`] that must be polled
//! continuously. Each connect spawns one worker task that owns the event
//! loop, forwards the broker's CONNACK back to the caller through a
//! oneshot, and fans incoming PUBLISH packets out to the
//! [`FeedRegistry`]. The worker is the only code touching the event loop;
//! callers talk to it through the cloneable [`AsyncClient`] request queue.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use yarbo_api::{Endpoint, MqttTransport, Transport, TransportConfig};
//!
//! let transport = MqttTransport::new(TransportConfig::default());
//! transport.subscribe("snowbot/+/device/DeviceMSG").await?;
//! transport.connect(&Endpoint::new("192.168.1.24", 1883), Duration::from_secs(10)).await?;
//! let mut feed = transport.inbound("snowbot/+/device/DeviceMSG");
//! while let Some(msg) = feed.recv().await {
//!     println!("{} ({} bytes)", msg.topic, msg.payload.len());
//! }
//! ```

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexSet;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::transport::{
    FeedRegistry, InboundFeed, InboundMessage, LinkState, Transport, TransportConfig,
};

// ── MqttTransport ────────────────────────────────────────────────────

/// Cheaply cloneable handle to one broker link.
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    active: Mutex<Option<ActiveLink>>,
    /// Cancel token of a connect still waiting for CONNACK.
    connecting: std::sync::Mutex<Option<CancellationToken>>,
    subscriptions: std::sync::Mutex<IndexSet<String>>,
    feeds: FeedRegistry,
    link: Arc<watch::Sender<LinkState>>,
    generation: AtomicU64,
}

/// Everything owned by one physical connection.
struct ActiveLink {
    endpoint: Endpoint,
    generation: u64,
    client: AsyncClient,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl MqttTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (link, _) = watch::channel(LinkState::Down);
        Self {
            inner: Arc::new(Inner {
                config,
                active: Mutex::new(None),
                connecting: std::sync::Mutex::new(None),
                subscriptions: std::sync::Mutex::new(IndexSet::new()),
                feeds: FeedRegistry::new(),
                link: Arc::new(link),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Endpoint of the live link, if any.
    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.endpoint.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.link.borrow().is_up()
    }

    fn remembered_subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn build_options(&self, endpoint: &Endpoint) -> MqttOptions {
        let config = &self.inner.config;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", config.client_id_prefix, &suffix[..8]);

        let mut options = MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        options
    }

    /// Stop the worker of `link`, giving a clean DISCONNECT a short grace period.
    async fn teardown(&self, link: ActiveLink) {
        let ActiveLink {
            endpoint,
            client,
            cancel,
            mut worker,
            ..
        } = link;

        if client.try_disconnect().is_ok()
            && tokio::time::timeout(self.inner.config.disconnect_grace, &mut worker)
                .await
                .is_ok()
        {
            debug!(endpoint = %endpoint, "MQTT link closed cleanly");
            return;
        }

        cancel.cancel();
        let _ = worker.await;
        debug!(endpoint = %endpoint, "MQTT link cancelled");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.active.get_mut().take() {
            link.cancel.cancel();
        }
        if let Some(cancel) = self.connecting.get_mut().ok().and_then(Option::take) {
            cancel.cancel();
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Transport for MqttTransport {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), Error> {
        let mut active = self.inner.active.lock().await;

        if let Some(current) = active.as_ref() {
            let live = *self.inner.link.borrow() == LinkState::Up {
                generation: current.generation,
            };
            if live && current.endpoint.same_broker(endpoint) {
                return Ok(());
            }
        }
        if let Some(stale) = active.take() {
            self.teardown(stale).await;
        }

        info!(endpoint = %endpoint, "connecting to MQTT broker");

        let options = self.build_options(endpoint);
        let (client, eventloop) = AsyncClient::new(options, self.inner.config.request_capacity);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (ack_tx, ack_rx) = oneshot::channel();

        let worker = tokio::spawn(run_event_loop(
            eventloop,
            WorkerContext {
                endpoint: endpoint.clone(),
                generation,
                timeout,
                feeds: self.inner.feeds.clone(),
                link: Arc::clone(&self.inner.link),
                cancel: cancel.clone(),
            },
            ack_tx,
        ));

        let link = ActiveLink {
            endpoint: endpoint.clone(),
            generation,
            client,
            cancel,
            worker,
        };

        // Stops the worker if this future is dropped before the link is stored.
        let abort_on_drop = link.cancel.clone().drop_guard();

        // Queued requests are flushed by the event loop right after CONNACK.
        for filter in self.remembered_subscriptions() {
            if let Err(e) = link.client.subscribe(filter, QoS::AtMostOnce).await {
                link.cancel.cancel();
                let _ = link.worker.await;
                return Err(e.into());
            }
        }

        if let Ok(mut pending) = self.inner.connecting.lock() {
            *pending = Some(link.cancel.clone());
        }
        let outcome = match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) if link.cancel.is_cancelled() => Err(Error::Disconnected),
            Ok(Err(_)) => Err(Error::Connect {
                endpoint: endpoint.to_string(),
                reason: "event loop stopped before the broker answered".into(),
            }),
            Err(_) => Err(Error::timeout("connect", timeout)),
        };
        if let Ok(mut pending) = self.inner.connecting.lock() {
            pending.take();
        }

        match outcome {
            Ok(()) => {
                info!(endpoint = %endpoint, generation, "MQTT link up");
                abort_on_drop.disarm();
                *active = Some(link);
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "MQTT connect failed");
                link.cancel.cancel();
                let _ = link.worker.await;
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        let pending = self.inner.connecting.lock().ok().and_then(|mut p| p.take());
        if let Some(cancel) = pending {
            cancel.cancel();
        }

        let link = self.inner.active.lock().await.take();
        if let Some(link) = link {
            let endpoint = link.endpoint.clone();
            self.teardown(link).await;
            info!(endpoint = %endpoint, "disconnected from MQTT broker");
        }
        self.inner.link.send_replace(LinkState::Down);
        self.inner.feeds.close_all();
    }

    async fn subscribe(&self, filter: &str) -> Result<(), Error> {
        let added = self
            .inner
            .subscriptions
            .lock()
            .map(|mut set| set.insert(filter.to_owned()))
            .unwrap_or(false);
        if !added {
            return Ok(());
        }

        let client = self.inner.active.lock().await.as_ref().map(|a| a.client.clone());
        if let Some(client) = client {
            client.subscribe(filter, QoS::AtMostOnce).await?;
            debug!(filter, "subscribed");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let client = self
            .inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.client.clone())
            .ok_or(Error::NotConnected)?;

        let len = payload.len();
        client.publish(topic, QoS::AtMostOnce, false, payload).await?;
        debug!(topic, bytes = len, "published");
        Ok(())
    }

    fn inbound(&self, filter: &str) -> InboundFeed {
        self.inner.feeds.register(filter)
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }
}

// ── Event loop worker ────────────────────────────────────────────────

struct WorkerContext {
    endpoint: Endpoint,
    generation: u64,
    timeout: Duration,
    feeds: FeedRegistry,
    link: Arc<watch::Sender<LinkState>>,
    cancel: CancellationToken,
}

/// Poll the event loop until cancelled or the link drops.
///
/// The first CONNACK (or the first error) resolves `ack`. After that,
/// errors end the worker: reconnect policy belongs to the caller.
async fn run_event_loop(
    mut eventloop: EventLoop,
    ctx: WorkerContext,
    ack: oneshot::Sender<Result<(), Error>>,
) {
    let mut ack = Some(ack);

    loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    ctx.link.send_replace(LinkState::Up { generation: ctx.generation });
                    if let Some(tx) = ack.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    let delivered = ctx.feeds.dispatch(&message);
                    tracing::trace!(topic = %message.topic, delivered, "inbound");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!(endpoint = %ctx.endpoint, "broker sent DISCONNECT");
                    break;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                Ok(_) => {}
                Err(e) => {
                    let err = classify(&ctx.endpoint, ctx.timeout, e);
                    match ack.take() {
                        Some(tx) => {
                            let _ = tx.send(Err(err));
                        }
                        None => warn!(endpoint = %ctx.endpoint, error = %err, "MQTT link lost"),
                    }
                    break;
                }
            }
        }
    }

    // Only clear state this worker owns; a newer link may already be up.
    let generation = ctx.generation;
    let was_ours = ctx.link.send_if_modified(|state| {
        if *state == (LinkState::Up { generation }) {
            *state = LinkState::Down;
            true
        } else {
            false
        }
    });
    if was_ours {
        ctx.feeds.close_all();
    }
    debug!(endpoint = %ctx.endpoint, generation, "MQTT worker exiting");
}

/// Map a `rumqttc` failure onto refused / timed out / unreachable.
fn classify(endpoint: &Endpoint, timeout: Duration, err: ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(code) => Error::Refused {
            endpoint: endpoint.to_string(),
            reason: format!("CONNACK {code:?}"),
        },
        ConnectionError::Io(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) =>
        {
            Error::Refused {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
        ConnectionError::NetworkTimeout => Error::timeout("connect", timeout),
        other => Error::Connect {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}
