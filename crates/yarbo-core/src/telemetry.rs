// ── Telemetry frames ──
//
// A `TelemetryFrame` is produced only from successfully decoded bytes.
// The payload stays an untyped JSON object; `DeviceStatus` is an optional,
// lenient view over `DeviceMSG` for callers that want typed fields.
// `PlanProgress` comes from `plan_feedback` and rides along on the
// `DeviceMSG` frames of a telemetry watch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use yarbo_api::codec::{self, Encoding, Payload};
use yarbo_api::topic;
use yarbo_api::transport::InboundMessage;

use crate::error::CoreError;

// ── TelemetryFrame ───────────────────────────────────────────────────

/// One decoded message from a device feedback topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryFrame {
    /// Full topic the frame arrived on.
    pub topic: String,
    /// Last topic segment (`DeviceMSG`, `heart_beat`, ...).
    pub leaf: String,
    pub payload: Payload,
    /// `Plain` for the heartbeat channel, `Compressed` for everything else.
    pub encoding: Encoding,
    pub received_at: DateTime<Utc>,
    /// Latest plan progress seen before this frame, telemetry watches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanProgress>,
}

impl TelemetryFrame {
    /// Decode a raw inbound message. Fails with `CoreError::Protocol`.
    pub fn decode(message: &InboundMessage) -> Result<Self, CoreError> {
        let decoded = codec::decode(&message.payload)?;
        Ok(Self {
            topic: message.topic.clone(),
            leaf: topic::leaf_of(&message.topic).to_owned(),
            payload: decoded.payload,
            encoding: decoded.encoding,
            received_at: Utc::now(),
            plan: None,
        })
    }

    pub fn with_plan(mut self, plan: Option<PlanProgress>) -> Self {
        self.plan = plan;
        self
    }

    pub fn is_device_msg(&self) -> bool {
        self.leaf == topic::leaf::DEVICE_MSG
    }

    /// Look up a dotted path such as `BatteryMSG.capacity`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.payload.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Typed view over a `DeviceMSG` payload.
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_payload(&self.payload)
    }
}

// ── DeviceStatus ─────────────────────────────────────────────────────

/// Fields pulled out of a `DeviceMSG` frame.
///
/// Every field is optional; firmware revisions disagree on which groups
/// they send. Groups not modelled here are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// State of charge, 0-100.
    pub battery: Option<i64>,
    pub working_state: Option<i64>,
    pub charging_status: Option<i64>,
    pub error_code: Option<i64>,
    /// Degrees, from the RTK heading group.
    pub heading: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub phi: Option<f64>,
    /// Raw LED hardware register, not the controllable channel state.
    pub led: Option<i64>,
    pub extra: Payload,
}

const MODELLED_GROUPS: &[&str] = &["BatteryMSG", "StateMSG", "RTKMSG", "CombinedOdom", "led"];

impl DeviceStatus {
    pub fn from_payload(payload: &Payload) -> Self {
        let group = |name: &str, field: &str| payload.get(name)?.as_object()?.get(field);
        let int = |name: &str, field: &str| group(name, field).and_then(as_int);
        let float = |name: &str, field: &str| group(name, field).and_then(Value::as_f64);

        let extra = payload
            .iter()
            .filter(|(k, _)| !MODELLED_GROUPS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            battery: int("BatteryMSG", "capacity"),
            working_state: int("StateMSG", "working_state"),
            charging_status: int("StateMSG", "charging_status"),
            error_code: int("StateMSG", "error_code"),
            heading: float("RTKMSG", "heading"),
            x: float("CombinedOdom", "x"),
            y: float("CombinedOdom", "y"),
            phi: float("CombinedOdom", "phi"),
            led: payload.get("led").and_then(as_int),
            extra,
        }
    }

    /// `idle` when the working state is zero, `active` otherwise.
    pub fn state(&self) -> Option<&'static str> {
        self.working_state
            .map(|s| if s == 0 { "idle" } else { "active" })
    }

    pub fn is_charging(&self) -> bool {
        self.charging_status.is_some_and(|s| s != 0)
    }
}

// ── PlanProgress ─────────────────────────────────────────────────────

/// Progress of the running work plan, from a `plan_feedback` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanProgress {
    /// Numeric on most firmware, a string on some.
    pub plan_id: Option<Value>,
    pub state: Option<i64>,
    /// Square metres.
    pub area_covered: Option<f64>,
    /// Seconds since the plan started.
    pub duration: Option<f64>,
}

impl PlanProgress {
    /// `None` for an empty payload.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        if payload.is_empty() {
            return None;
        }
        Some(Self {
            plan_id: payload.get("planId").filter(|v| !v.is_null()).cloned(),
            state: payload.get("state").and_then(as_int),
            area_covered: payload.get("areaCovered").and_then(Value::as_f64),
            duration: payload.get("duration").and_then(Value::as_f64),
        })
    }
}

/// Integers arrive as numbers or as numeric strings (`"led": "69666"`).
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
