// Transport abstraction shared by the MQTT implementation and test doubles.
//
// A transport owns one physical link to one broker. Inbound messages are
// fanned out from the link's worker task to per-consumer queues held in a
// `FeedRegistry`; consumers never touch the worker's state directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_core::Stream;
use tokio::sync::{mpsc, watch};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::topic;

// ── TransportConfig ──────────────────────────────────────────────────

/// Tuning for the MQTT link.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// MQTT keep-alive interval. Default: 60s.
    pub keep_alive: Duration,
    /// Prefix for the generated client id; a random suffix is appended.
    pub client_id_prefix: String,
    /// Capacity of the outgoing request queue to the event loop.
    pub request_capacity: usize,
    /// Largest packet accepted or sent, in bytes.
    pub max_packet_size: usize,
    /// How long `disconnect()` waits for a clean DISCONNECT to flush.
    pub disconnect_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            client_id_prefix: "yarbo-rs".into(),
            request_capacity: 64,
            max_packet_size: 1024 * 1024,
            disconnect_grace: Duration::from_millis(250),
        }
    }
}

// ── LinkState ────────────────────────────────────────────────────────

/// Physical link state, observable through [`Transport::link`].
///
/// `generation` increases on every successful connect, so observers can
/// tell a reconnect apart from a link that never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Up { generation: u64 },
}

impl LinkState {
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up { .. })
    }

    pub fn generation(self) -> Option<u64> {
        match self {
            Self::Up { generation } => Some(generation),
            Self::Down => None,
        }
    }
}

// ── Transport trait ──────────────────────────────────────────────────

/// One physical connection to one broker.
pub trait Transport: Send + Sync + 'static {
    /// Connect to `endpoint`, waiting at most `timeout` for the broker ack.
    ///
    /// A no-op if already connected to the same broker. Connecting to a
    /// different broker tears down the current link first.
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tear down the link. Always succeeds; closes every inbound feed.
    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    /// Add a topic filter. Remembered and replayed on every reconnect.
    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<(), Error>> + Send;

    /// Publish raw bytes. Fails with [`Error::NotConnected`] when the link is down.
    fn publish(&self, topic: &str, payload: Vec<u8>)
    -> impl Future<Output = Result<(), Error>> + Send;

    /// Open a feed of inbound messages whose topic matches `filter`.
    fn inbound(&self, filter: &str) -> InboundFeed;

    /// Observe link state changes.
    fn link(&self) -> watch::Receiver<LinkState>;
}

// ── Inbound messages ─────────────────────────────────────────────────

/// One raw message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Last topic segment (`DeviceMSG`, `heart_beat`, ...).
    pub fn leaf(&self) -> &str {
        topic::leaf_of(&self.topic)
    }
}

// ── FeedRegistry ─────────────────────────────────────────────────────

/// Fan-out point between a transport's worker task and its consumers.
///
/// Each registered feed owns an unbounded queue. The worker calls
/// [`dispatch`](Self::dispatch) in arrival order, so every feed sees its
/// matching messages in that same order. Dropping a feed unregisters it.
#[derive(Clone, Default)]
pub struct FeedRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    feeds: DashMap<u64, FeedSlot>,
    next_id: AtomicU64,
}

struct FeedSlot {
    filter: String,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new consumer for topics matching `filter`.
    pub fn register(&self, filter: &str) -> InboundFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.feeds.insert(
            id,
            FeedSlot {
                filter: filter.to_owned(),
                tx,
            },
        );
        InboundFeed {
            id,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `message` to every matching feed. Returns the delivery count.
    pub fn dispatch(&self, message: &InboundMessage) -> usize {
        let mut delivered = 0;
        for slot in self.inner.feeds.iter() {
            if topic::matches_filter(&slot.filter, &message.topic)
                && slot.tx.send(message.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every sender so all pending `recv()` calls resolve to `None`.
    pub fn close_all(&self) {
        self.inner.feeds.clear();
    }

    /// Number of live feeds.
    pub fn len(&self) -> usize {
        self.inner.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.feeds.is_empty()
    }
}

/// A consumer's view of inbound traffic.
///
/// Yields `None` once the link is torn down. Usable directly via
/// [`recv`](Self::recv) or as a [`Stream`].
pub struct InboundFeed {
    id: u64,
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    registry: Weak<RegistryInner>,
}

impl InboundFeed {
    /// Wait for the next message. `None` means the link is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Non-blocking poll of the queue.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

impl Stream for InboundFeed {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for InboundFeed {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.feeds.remove(&self.id);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
