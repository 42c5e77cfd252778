//! In-memory `Transport` double shared by the integration tests.
//!
//! Records every publish, injects inbound frames through a real
//! `FeedRegistry`, and can play the device side of the ack protocol.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use yarbo_api::codec::{self, Payload};
use yarbo_api::{Endpoint, Error, FeedRegistry, InboundFeed, InboundMessage, LinkState, Transport};
use yarbo_core::{ClientConfig, SessionConfig};

pub const NAMESPACE: &str = "ns";
pub const SERIAL: &str = "ABC123";

#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    feeds: FeedRegistry,
    link: watch::Sender<LinkState>,
    generation: AtomicU64,
    connects: AtomicUsize,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<String>>,
    /// `data_feedback` state sent back per verb; absent verbs stay silent.
    replies: Mutex<HashMap<String, i64>>,
    connect_failures: Mutex<VecDeque<Error>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let (link, _) = watch::channel(LinkState::Down);
        Self {
            inner: Arc::new(MockInner {
                feeds: FeedRegistry::new(),
                link,
                generation: AtomicU64::new(0),
                connects: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                replies: Mutex::new(HashMap::new()),
                connect_failures: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// A mock whose device grants the controller role.
    pub fn granting() -> Self {
        let mock = Self::new();
        mock.reply_to("get_controller", 0);
        mock
    }

    // ── Device behaviour ─────────────────────────────────────────

    /// Answer every publish of `verb` with `{"topic": verb, "state": state}`.
    pub fn reply_to(&self, verb: &str, state: i64) {
        self.inner.replies.lock().unwrap().insert(verb.to_owned(), state);
    }

    pub fn stay_silent(&self, verb: &str) {
        self.inner.replies.lock().unwrap().remove(verb);
    }

    pub fn fail_next_connect(&self, err: Error) {
        self.inner.connect_failures.lock().unwrap().push_back(err);
    }

    /// Deliver raw bytes as if the broker forwarded them.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.inner
            .feeds
            .dispatch(&InboundMessage::new(topic, payload.into()))
    }

    /// Deliver a compressed JSON object on `<ns>/<sn>/device/<leaf>`.
    pub fn inject_json(&self, leaf: &str, value: Value) -> usize {
        let bytes = codec::encode(&object(value)).unwrap();
        self.inject(&device_topic(leaf), bytes)
    }

    /// The link dies underneath the session, as a lost TCP connection would.
    pub fn drop_link(&self) {
        self.inner.link.send_replace(LinkState::Down);
        self.inner.feeds.close_all();
    }

    // ── Inspection ───────────────────────────────────────────────

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.published.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.inner.published.lock().unwrap().len()
    }

    /// Decoded bodies published on `<ns>/<sn>/app/<verb>`.
    pub fn published_to(&self, verb: &str) -> Vec<Payload> {
        let topic = app_topic(verb);
        self.published()
            .into_iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, bytes)| codec::decode(&bytes).unwrap().payload)
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().unwrap().clone()
    }

    fn answer(&self, topic: &str) {
        let Some(verb) = topic.strip_prefix(&format!("{NAMESPACE}/{SERIAL}/app/")) else {
            return;
        };
        let state = self.inner.replies.lock().unwrap().get(verb).copied();
        if let Some(state) = state {
            self.inject_json(
                "data_feedback",
                json!({"topic": verb, "state": state, "data": {}}),
            );
        }
    }
}

impl Transport for MockTransport {
    async fn connect(&self, _endpoint: &Endpoint, _timeout: Duration) -> Result<(), Error> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        let failure = self.inner.connect_failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        if self.inner.link.borrow().is_up() {
            return Ok(());
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.link.send_replace(LinkState::Up { generation });
        Ok(())
    }

    async fn disconnect(&self) {
        self.drop_link();
    }

    async fn subscribe(&self, filter: &str) -> Result<(), Error> {
        let mut subs = self.inner.subscriptions.lock().unwrap();
        if !subs.iter().any(|s| s == filter) {
            subs.push(filter.to_owned());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        if !self.inner.link.borrow().is_up() {
            return Err(Error::NotConnected);
        }
        self.inner
            .published
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload));
        self.answer(topic);
        Ok(())
    }

    fn inbound(&self, filter: &str) -> InboundFeed {
        self.inner.feeds.register(filter)
    }

    fn link(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn endpoint() -> Endpoint {
    Endpoint::new("192.168.1.24", 1883).with_serial(SERIAL)
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        namespace: NAMESPACE.into(),
        command_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

pub fn manual_session_config() -> SessionConfig {
    SessionConfig {
        auto_controller: false,
        ..session_config()
    }
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        session: session_config(),
        ..ClientConfig::new(endpoint())
    }
}

pub fn app_topic(verb: &str) -> String {
    format!("{NAMESPACE}/{SERIAL}/app/{verb}")
}

pub fn device_topic(leaf: &str) -> String {
    format!("{NAMESPACE}/{SERIAL}/device/{leaf}")
}

pub fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn device_msg(capacity: i64) -> Value {
    json!({
        "BatteryMSG": {"capacity": capacity},
        "StateMSG": {"working_state": 0, "charging_status": 1, "error_code": 0},
        "RTKMSG": {"heading": 90.0},
    })
}
