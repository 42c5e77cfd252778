// Integration tests for `LocalClient` over an in-memory transport.

#![allow(clippy::unwrap_used)]

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use yarbo_api::Error;
use yarbo_core::{ClientConfig, Command, LocalClient, ReconnectConfig, SessionState};

use support::{MockTransport, client_config, device_msg, object};

// ── Helpers ─────────────────────────────────────────────────────────

fn client(mock: &MockTransport) -> LocalClient<MockTransport> {
    LocalClient::with_transport(mock.clone(), fast_retry(client_config())).unwrap()
}

fn fast_retry(config: ClientConfig) -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            max_retries: None,
        },
        ..config
    }
}

fn flaky() -> Error {
    Error::Connect {
        endpoint: "192.168.1.24:1883".into(),
        reason: "host unreachable".into(),
    }
}

async fn connected(mock: &MockTransport) -> LocalClient<MockTransport> {
    let client = client(mock);
    client.connect().await.unwrap();
    assert!(client.is_controller());
    client
}

// ── Device operations ───────────────────────────────────────────────

#[tokio::test]
async fn test_light_presets() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    client.lights_off().await.unwrap();
    client.lights_body().await.unwrap();

    let sent = mock.published_to("light_ctrl");
    assert_eq!(sent.len(), 2);
    assert!(sent[0].values().all(|v| *v == json!(0)));
    assert_eq!(sent[1]["led_head"], json!(0));
    assert_eq!(sent[1]["body_left_r"], json!(255));
}

#[tokio::test]
async fn test_buzzer_carries_timestamp() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    client.buzzer(true).await.unwrap();
    client.buzzer(false).await.unwrap();

    let sent = mock.published_to("cmd_buzzer");
    assert_eq!(sent[0]["state"], json!(1));
    assert_eq!(sent[1]["state"], json!(0));
    assert!(sent[0]["timeStamp"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_actuator_payloads() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    client.chute(-25).await.unwrap();
    client.head_light(true).await.unwrap();
    client.roof_lights(false).await.unwrap();
    client.emergency_unlock().await.unwrap();

    assert_eq!(mock.published_to("cmd_chute"), vec![object(json!({"vel": -25}))]);
    assert_eq!(mock.published_to("head_light"), vec![object(json!({"state": 1}))]);
    assert_eq!(
        mock.published_to("roof_lights_enable"),
        vec![object(json!({"enable": 0}))]
    );
    assert_eq!(mock.published_to("emergency_unlock"), vec![object(json!({}))]);
}

#[tokio::test]
async fn test_plan_operations_wait_for_ack() {
    let mock = MockTransport::granting();
    for verb in ["pause_plan", "resume_plan", "stop_plan", "cmd_recharge"] {
        mock.reply_to(verb, 0);
    }
    let client = connected(&mock).await;

    assert_eq!(client.pause_plan().await.unwrap().topic, "pause_plan");
    assert_eq!(client.resume_plan().await.unwrap().topic, "resume_plan");
    assert_eq!(client.stop_plan().await.unwrap().topic, "stop_plan");
    assert_eq!(client.return_to_dock().await.unwrap().topic, "cmd_recharge");
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_plan_times_out() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    let err = client.start_plan("3").await.unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn test_execute_picks_ack_mode_per_verb() {
    let mock = MockTransport::granting();
    mock.reply_to("stop_plan", 0);
    let client = connected(&mock).await;

    let fire_and_forget = client.execute(Command::EmergencyStop).await.unwrap();
    assert!(fire_and_forget.is_none());

    let acked = client.execute(Command::StopPlan).await.unwrap();
    assert!(acked.unwrap().is_success());
}

#[tokio::test]
async fn test_device_status_view() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    let injector = {
        let mock = mock.clone();
        tokio::spawn(async move {
            while mock.inject_json("DeviceMSG", device_msg(42)) == 0 {
                tokio::task::yield_now().await;
            }
        })
    };
    let status = client
        .get_device_status(Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();
    injector.await.unwrap();

    assert_eq!(status.battery, Some(42));
    assert_eq!(status.state(), Some("idle"));
    assert_eq!(status.heading, Some(90.0));
}

#[tokio::test]
async fn test_read_only_status_leaves_controller_alone() {
    let mock = MockTransport::granting();
    let config = ClientConfig {
        session: support::manual_session_config(),
        ..client_config()
    };
    let client = LocalClient::with_transport(mock.clone(), config).unwrap();
    client.connect().await.unwrap();

    let injector = {
        let mock = mock.clone();
        tokio::spawn(async move {
            while mock.inject_json("DeviceMSG", device_msg(70)) == 0 {
                tokio::task::yield_now().await;
            }
        })
    };
    let status = client
        .get_device_status(Duration::from_secs(2))
        .await
        .unwrap()
        .unwrap();
    injector.await.unwrap();

    assert_eq!(status.battery, Some(70));
    assert!(!client.is_controller());
    assert!(mock.published_to("get_controller").is_empty());
    assert_eq!(mock.publish_count(), 0);
}

// ── Reconnect ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_rides_out_transient_failures() {
    let mock = MockTransport::granting();
    mock.fail_next_connect(flaky());
    mock.fail_next_connect(flaky());
    let client = client(&mock);

    client
        .connect_with_retry(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(mock.connect_count(), 3);
    assert_eq!(client.state(), SessionState::ControllerAcquired);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_stops_on_refusal() {
    let mock = MockTransport::granting();
    mock.fail_next_connect(Error::Refused {
        endpoint: "192.168.1.24:1883".into(),
        reason: "connection refused".into(),
    });
    let client = client(&mock);

    let err = client
        .connect_with_retry(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_refused());
    assert_eq!(mock.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_retry_honours_retry_limit() {
    let mock = MockTransport::granting();
    for _ in 0..5 {
        mock.fail_next_connect(flaky());
    }
    let mut config = fast_retry(client_config());
    config.reconnect.max_retries = Some(2);
    let client = LocalClient::with_transport(mock.clone(), config).unwrap();

    let err = client
        .connect_with_retry(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_connection());
    assert_eq!(mock.connect_count(), 3);
}

#[tokio::test]
async fn test_supervisor_restores_dropped_session() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;
    let cancel = CancellationToken::new();

    let supervisor = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.run_reconnect_supervisor(cancel).await }
    });

    mock.drop_link();

    let mut state = client.session().watch_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while mock.connect_count() < 2 || *state.borrow() != SessionState::ControllerAcquired {
            state.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(client.session().lease().unwrap().generation, 2);

    cancel.cancel();
    supervisor.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_supervisor_exits_when_closed() {
    let mock = MockTransport::granting();
    let client = connected(&mock).await;

    let supervisor = tokio::spawn({
        let client = client.clone();
        async move { client.run_reconnect_supervisor(CancellationToken::new()).await }
    });

    client.close().await;

    tokio::time::timeout(Duration::from_secs(2), supervisor)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(mock.connect_count(), 1);
}
