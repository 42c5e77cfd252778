#![allow(clippy::unwrap_used)]
// Integration tests for `MqttTransport` against an in-process broker.

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use rumqttc::ConnectReturnCode;
use yarbo_api::{InboundFeed, LinkState, MqttTransport, Transport};

use support::Broker;

const TELEMETRY: &str = "snowbot/SN1/device/DeviceMSG";
const COMMAND: &str = "snowbot/SN1/app/light_ctrl";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Helpers ─────────────────────────────────────────────────────────

async fn next(feed: &mut InboundFeed) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("no message within 5s")
        .expect("feed closed")
        .payload
        .to_vec()
}

async fn wait_link_down(transport: &MqttTransport) {
    let mut link = transport.link();
    tokio::time::timeout(Duration::from_secs(5), link.wait_for(|s| !s.is_up()))
        .await
        .expect("link never went down")
        .unwrap();
}

// ── Connect ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connack_brings_link_up() {
    let broker = Broker::start().await;
    let transport = MqttTransport::default();

    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();

    assert!(transport.is_connected());
    assert_eq!(*transport.link().borrow(), LinkState::Up { generation: 1 });
    assert_eq!(broker.connects(), 1);

    // Connecting again to the same live broker keeps the link.
    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.connects(), 1);
    assert_eq!(transport.link().borrow().generation(), Some(1));

    transport.disconnect().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_silent_broker_times_out() {
    let (endpoint, listener) = support::silent_listener().await;
    let transport = MqttTransport::default();

    let err = transport
        .connect(&endpoint, Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "{err:?}");
    assert!(!transport.is_connected());
    listener.abort();
}

#[tokio::test]
async fn test_connack_refusal_is_refused() {
    let broker = Broker::refusing(ConnectReturnCode::NotAuthorized).await;
    let transport = MqttTransport::default();

    let err = transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap_err();

    assert!(err.is_refused(), "{err:?}");
    assert!(!err.is_transient());
    assert!(!transport.is_connected());
}

// ── Traffic ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inbound_keeps_broker_order() {
    let broker = Broker::start().await;
    let transport = MqttTransport::default();
    transport.subscribe(TELEMETRY).await.unwrap();
    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    let mut feed = transport.inbound(TELEMETRY);
    broker.wait_for_subscriber(TELEMETRY).await;

    for i in 0..50u8 {
        broker.publish(TELEMETRY, vec![i]);
    }

    for i in 0..50u8 {
        assert_eq!(next(&mut feed).await, vec![i]);
    }
    assert!(feed.try_recv().is_none());
}

#[tokio::test]
async fn test_publish_reaches_other_subscribers() {
    let broker = Broker::start().await;
    let device = MqttTransport::default();
    let app = MqttTransport::default();

    device.subscribe(COMMAND).await.unwrap();
    device
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    let mut commands = device.inbound(COMMAND);
    broker.wait_for_subscriber(COMMAND).await;

    app.connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    app.publish(COMMAND, b"on".to_vec()).await.unwrap();
    app.publish(COMMAND, b"off".to_vec()).await.unwrap();

    assert_eq!(next(&mut commands).await, b"on".to_vec());
    assert_eq!(next(&mut commands).await, b"off".to_vec());
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconnect_resubscribes_and_bumps_generation() {
    let broker = Broker::start().await;
    let transport = MqttTransport::default();
    transport.subscribe(TELEMETRY).await.unwrap();
    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    let mut feed = transport.inbound(TELEMETRY);
    broker.wait_for_subscriber(TELEMETRY).await;
    broker.publish(TELEMETRY, b"before".to_vec());
    assert_eq!(next(&mut feed).await, b"before".to_vec());

    broker.drop_clients();
    wait_link_down(&transport).await;
    assert!(feed.recv().await.is_none(), "feeds end with the link");
    assert!(transport.publish(COMMAND, vec![1]).await.unwrap_err().is_connection());

    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(transport.link().borrow().generation(), Some(2));
    assert_eq!(broker.connects(), 2);

    let mut feed = transport.inbound(TELEMETRY);
    broker.wait_for_subscriber(TELEMETRY).await;
    assert_eq!(broker.subscribe_log(), vec![TELEMETRY.to_owned(), TELEMETRY.to_owned()]);

    broker.publish(TELEMETRY, b"after".to_vec());
    assert_eq!(next(&mut feed).await, b"after".to_vec());
}

#[tokio::test]
async fn test_subscribe_while_live_reaches_broker() {
    let broker = Broker::start().await;
    let transport = MqttTransport::default();
    transport
        .connect(&broker.endpoint(), CONNECT_TIMEOUT)
        .await
        .unwrap();

    transport.subscribe(TELEMETRY).await.unwrap();
    let mut feed = transport.inbound(TELEMETRY);
    broker.wait_for_subscriber(TELEMETRY).await;
    broker.publish("snowbot/SN1/device/heart_beat", b"skip".to_vec());
    broker.publish(TELEMETRY, b"hit".to_vec());

    assert_eq!(next(&mut feed).await, b"hit".to_vec());
    broker.stop();
}
