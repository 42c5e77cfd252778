// ── Typed request bodies for Command payloads ──
//
// Field names follow the firmware's JSON keys exactly; several are
// camelCase on the wire even though the verbs are snake_case.

use serde::{Deserialize, Serialize};

// ── Lights ─────────────────────────────────────────────────────────

/// All seven LED channels of `light_ctrl`, each 0-255.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    #[serde(default)]
    pub led_head: u8,
    #[serde(default)]
    pub led_left_w: u8,
    #[serde(default)]
    pub led_right_w: u8,
    #[serde(default)]
    pub body_left_r: u8,
    #[serde(default)]
    pub body_right_r: u8,
    #[serde(default)]
    pub tail_left_r: u8,
    #[serde(default)]
    pub tail_right_r: u8,
}

impl LightState {
    /// Every channel at `level`.
    pub fn uniform(level: u8) -> Self {
        Self {
            led_head: level,
            led_left_w: level,
            led_right_w: level,
            body_left_r: level,
            body_right_r: level,
            tail_left_r: level,
            tail_right_r: level,
        }
    }

    pub fn all_on() -> Self {
        Self::uniform(u8::MAX)
    }

    pub fn all_off() -> Self {
        Self::default()
    }

    /// Red body accents only.
    pub fn body_only() -> Self {
        Self {
            body_left_r: u8::MAX,
            body_right_r: u8::MAX,
            ..Self::default()
        }
    }
}

// ── Buzzer / chute ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzerRequest {
    /// 1 plays, 0 stops.
    pub state: u8,
    /// Epoch milliseconds.
    #[serde(rename = "timeStamp")]
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChuteRequest {
    /// Positive turns right, negative left.
    pub vel: i32,
}

// ── Plans ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPlanRequest {
    #[serde(rename = "planId")]
    pub plan_id: String,
}

// ── Auxiliary lights ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadLightRequest {
    pub state: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoofLightsRequest {
    pub enable: u8,
}
