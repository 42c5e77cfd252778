//! A small in-process MQTT 3.1.1 broker for transport tests.
//!
//! Speaks just enough of the protocol for `rumqttc`: CONNECT, SUBSCRIBE,
//! QoS 0 PUBLISH routing and PINGREQ. Tests can inject publishes from the
//! broker side and drop every client connection to simulate link loss.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rumqttc::mqttbytes::{self, v4};
use rumqttc::{ConnAck, ConnectReturnCode, PingResp, Publish, QoS, SubAck, SubscribeReasonCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use yarbo_api::Endpoint;
use yarbo_api::topic::matches_filter;

const MAX_PACKET: usize = 1024 * 1024;

#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    port: u16,
    refuse: Option<ConnectReturnCode>,
    clients: Mutex<Vec<Client>>,
    /// Every SUBSCRIBE filter seen, in arrival order, across connections.
    subscribe_log: Mutex<Vec<String>>,
    connects: Mutex<usize>,
    kick: Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

struct Client {
    id: usize,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<Publish>,
}

impl Broker {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// A broker that answers every CONNECT with `code`.
    pub async fn refusing(code: ConnectReturnCode) -> Self {
        Self::start_with(Some(code)).await
    }

    async fn start_with(refuse: Option<ConnectReturnCode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = Self {
            inner: Arc::new(BrokerInner {
                port,
                refuse,
                clients: Mutex::new(Vec::new()),
                subscribe_log: Mutex::new(Vec::new()),
                connects: Mutex::new(0),
                kick: Mutex::new(CancellationToken::new()),
                shutdown: CancellationToken::new(),
            }),
        };
        tokio::spawn(broker.clone().accept_loop(listener));
        broker
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.inner.port)
    }

    pub fn connects(&self) -> usize {
        *self.inner.connects.lock().unwrap()
    }

    pub fn subscribe_log(&self) -> Vec<String> {
        self.inner.subscribe_log.lock().unwrap().clone()
    }

    /// Number of live connections subscribed to a filter matching `topic`.
    pub fn subscribers(&self, topic: &str) -> usize {
        self.inner
            .clients
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.filters.iter().any(|f| matches_filter(f, topic)))
            .count()
    }

    /// Wait until some live connection would receive `topic`.
    pub async fn wait_for_subscriber(&self, topic: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.subscribers(topic) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("nobody subscribed to {topic}"));
    }

    /// Publish as if another client on the broker sent it.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) {
        self.inner
            .route(&Publish::from_bytes(topic, QoS::AtMostOnce, payload.into()));
    }

    /// Close every client connection without a DISCONNECT.
    pub fn drop_clients(&self) {
        let old = std::mem::take(&mut *self.inner.kick.lock().unwrap());
        old.cancel();
    }

    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        self.drop_clients();
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut next_id = 0;
        loop {
            let stream = tokio::select! {
                () = self.inner.shutdown.cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(_) => return,
                },
            };
            next_id += 1;
            let kick = self.inner.kick.lock().unwrap().clone();
            tokio::spawn(Arc::clone(&self.inner).serve(next_id, stream, kick));
        }
    }
}

impl BrokerInner {
    fn route(&self, publish: &Publish) {
        for client in self.clients.lock().unwrap().iter() {
            if client.filters.iter().any(|f| matches_filter(f, &publish.topic)) {
                let _ = client.tx.send(publish.clone());
            }
        }
    }

    fn add_filters(&self, id: usize, filters: &[String]) {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
            client.filters.extend_from_slice(filters);
        }
        self.subscribe_log.lock().unwrap().extend_from_slice(filters);
    }

    async fn serve(self: Arc<Self>, id: usize, mut stream: TcpStream, kick: CancellationToken) {
        let (tx, mut outbound) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().push(Client {
            id,
            filters: Vec::new(),
            tx,
        });

        let mut read_buf = BytesMut::with_capacity(4096);
        'conn: loop {
            tokio::select! {
                () = kick.cancelled() => break,
                Some(publish) = outbound.recv() => {
                    let mut out = BytesMut::new();
                    publish.write(&mut out).unwrap();
                    if stream.write_all(&out).await.is_err() {
                        break;
                    }
                }
                read = stream.read_buf(&mut read_buf) => {
                    if !matches!(read, Ok(n) if n > 0) {
                        break;
                    }
                    loop {
                        let packet = match v4::read(&mut read_buf, MAX_PACKET) {
                            Ok(packet) => packet,
                            Err(mqttbytes::Error::InsufficientBytes(_)) => break,
                            Err(_) => break 'conn,
                        };
                        let mut out = BytesMut::new();
                        match packet {
                            v4::Packet::Connect(_) => {
                                *self.connects.lock().unwrap() += 1;
                                let code = self.refuse.unwrap_or(ConnectReturnCode::Success);
                                ConnAck::new(code, false).write(&mut out).unwrap();
                                if self.refuse.is_some() {
                                    let _ = stream.write_all(&out).await;
                                    break 'conn;
                                }
                            }
                            v4::Packet::Subscribe(subscribe) => {
                                let filters: Vec<String> =
                                    subscribe.filters.iter().map(|f| f.path.clone()).collect();
                                self.add_filters(id, &filters);
                                let codes = filters
                                    .iter()
                                    .map(|_| SubscribeReasonCode::Success(QoS::AtMostOnce))
                                    .collect();
                                SubAck::new(subscribe.pkid, codes).write(&mut out).unwrap();
                            }
                            v4::Packet::Publish(publish) => self.route(&publish),
                            v4::Packet::PingReq => {
                                PingResp.write(&mut out).unwrap();
                            }
                            v4::Packet::Disconnect => break 'conn,
                            _ => {}
                        }
                        if !out.is_empty() && stream.write_all(&out).await.is_err() {
                            break 'conn;
                        }
                    }
                }
            }
        }

        self.clients.lock().unwrap().retain(|c| c.id != id);
    }
}

/// A TCP listener that accepts connections and never says a word.
pub async fn silent_listener() -> (Endpoint, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (Endpoint::new("127.0.0.1", port), handle)
}
