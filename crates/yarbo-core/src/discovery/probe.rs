// ── Per-host probes ──
//
// Two steps per candidate: a bare TCP connect to see whether anything
// listens on the broker port, then an anonymous MQTT session that
// subscribes to the wildcard feedback topics and reads the serial out
// of the first topic that shows up. Payloads are never decoded.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;
use yarbo_api::topic::{self, SNIFF_LEAVES};
use yarbo_api::{Endpoint, MqttTransport, Transport, TransportConfig};

/// `Ok` if a TCP connection to `endpoint` opens within `timeout`.
pub async fn tcp_reachable(endpoint: &Endpoint, timeout: Duration) -> io::Result<()> {
    let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no answer within {timeout:?}"),
        )),
    }
}

/// Listen on `endpoint` for any device message and return the serial
/// from its topic. `None` when nothing arrives within `timeout`, which
/// also bounds the MQTT connect.
pub async fn sniff_serial(endpoint: &Endpoint, namespace: &str, timeout: Duration) -> Option<String> {
    let transport = MqttTransport::new(TransportConfig {
        client_id_prefix: "yarbo-probe".into(),
        keep_alive: Duration::from_secs(10),
        ..TransportConfig::default()
    });

    let deadline = tokio::time::Instant::now() + timeout;
    let serial = tokio::time::timeout_at(deadline, sniff(&transport, endpoint, namespace, timeout))
        .await
        .unwrap_or_else(|_| {
            debug!(endpoint = %endpoint, "no device traffic within sniff window");
            None
        });

    transport.disconnect().await;
    serial
}

async fn sniff(
    transport: &MqttTransport,
    endpoint: &Endpoint,
    namespace: &str,
    timeout: Duration,
) -> Option<String> {
    let filters: Vec<String> = SNIFF_LEAVES
        .iter()
        .map(|leaf| topic::wildcard_feedback(namespace, leaf))
        .collect();
    let mut feeds = Vec::with_capacity(filters.len());
    for filter in &filters {
        transport.subscribe(filter).await.ok()?;
        feeds.push(transport.inbound(filter));
    }

    if let Err(e) = transport.connect(endpoint, timeout).await {
        debug!(endpoint = %endpoint, error = %e, "MQTT sniff could not connect");
        return None;
    }

    let mut merged = futures_util::stream::select_all(feeds);
    while let Some(msg) = futures_util::StreamExt::next(&mut merged).await {
        if let Some(parts) = topic::parse_topic(&msg.topic) {
            debug!(endpoint = %endpoint, serial = parts.serial, "serial sniffed");
            return Some(parts.serial.to_owned());
        }
    }
    None
}
