// ── Command API ──
//
// Every device-mutating operation flows through the `Command` enum. The
// session turns a command into a `CommandEnvelope` (verb + JSON object)
// and publishes it on `{ns}/{sn}/app/{verb}`.

pub mod requests;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use yarbo_api::codec::{self, Payload};
use yarbo_api::topic::verb;

use crate::error::CoreError;

pub use requests::{
    BuzzerRequest, ChuteRequest, HeadLightRequest, LightState, RoofLightsRequest,
    StartPlanRequest,
};

// ── CommandEnvelope ──────────────────────────────────────────────────

/// A verb and its JSON body, ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub verb: String,
    pub payload: Payload,
}

impl CommandEnvelope {
    pub fn new(verb: impl Into<String>, payload: Payload) -> Self {
        Self {
            verb: verb.into(),
            payload,
        }
    }

    /// A verb with an empty `{}` body.
    pub fn empty(verb: impl Into<String>) -> Self {
        Self::new(verb, Payload::new())
    }

    /// The controller handshake request.
    pub fn get_controller() -> Self {
        Self::empty(verb::GET_CONTROLLER)
    }
}

// ── Command ──────────────────────────────────────────────────────────

/// All device-mutating operations a local client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Lights & sound ───────────────────────────────────────────────
    SetLights(LightState),
    /// `true` plays, `false` silences.
    Buzzer {
        state: bool,
    },
    HeadLight {
        on: bool,
    },
    RoofLights {
        on: bool,
    },

    // ── Actuators ────────────────────────────────────────────────────
    Chute {
        velocity: i32,
    },

    // ── Plans ────────────────────────────────────────────────────────
    StartPlan {
        plan_id: String,
    },
    StopPlan,
    PausePlan,
    ResumePlan,
    ReturnToDock,

    // ── Safety ───────────────────────────────────────────────────────
    EmergencyStop,
    EmergencyUnlock,

    // ── Escape hatch ─────────────────────────────────────────────────
    /// Arbitrary verb with a caller-built body.
    Raw {
        verb: String,
        payload: Payload,
    },
}

impl Command {
    /// The topic verb this command is published under.
    pub fn verb(&self) -> &str {
        match self {
            Self::SetLights(_) => verb::LIGHT_CTRL,
            Self::Buzzer { .. } => verb::CMD_BUZZER,
            Self::HeadLight { .. } => verb::HEAD_LIGHT,
            Self::RoofLights { .. } => verb::ROOF_LIGHTS,
            Self::Chute { .. } => verb::CMD_CHUTE,
            Self::StartPlan { .. } => verb::START_PLAN,
            Self::StopPlan => verb::STOP_PLAN,
            Self::PausePlan => verb::PAUSE_PLAN,
            Self::ResumePlan => verb::RESUME_PLAN,
            Self::ReturnToDock => verb::CMD_RECHARGE,
            Self::EmergencyStop => verb::EMERGENCY_STOP,
            Self::EmergencyUnlock => verb::EMERGENCY_UNLOCK,
            Self::Raw { verb, .. } => verb,
        }
    }

    /// Whether the firmware answers this verb on `data_feedback`.
    ///
    /// Lights, buzzer and chute are fire-and-forget; plan and recharge
    /// commands report acceptance.
    pub fn expects_ack(&self) -> bool {
        matches!(
            self,
            Self::StartPlan { .. }
                | Self::StopPlan
                | Self::PausePlan
                | Self::ResumePlan
                | Self::ReturnToDock
        )
    }

    /// Build the wire envelope. Fails only for malformed `Raw` verbs.
    pub fn into_envelope(self) -> Result<CommandEnvelope, CoreError> {
        let payload = match &self {
            Self::SetLights(state) => codec::to_payload(state)?,
            Self::Buzzer { state } => codec::to_payload(&BuzzerRequest {
                state: u8::from(*state),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            })?,
            Self::HeadLight { on } => codec::to_payload(&HeadLightRequest {
                state: u8::from(*on),
            })?,
            Self::RoofLights { on } => codec::to_payload(&RoofLightsRequest {
                enable: u8::from(*on),
            })?,
            Self::Chute { velocity } => codec::to_payload(&ChuteRequest { vel: *velocity })?,
            Self::StartPlan { plan_id } => codec::to_payload(&StartPlanRequest {
                plan_id: plan_id.clone(),
            })?,
            Self::StopPlan
            | Self::PausePlan
            | Self::ResumePlan
            | Self::ReturnToDock
            | Self::EmergencyStop
            | Self::EmergencyUnlock => Payload::new(),
            Self::Raw { verb, payload } => {
                validate_verb(verb)?;
                payload.clone()
            }
        };
        Ok(CommandEnvelope::new(self.verb(), payload))
    }
}

/// A verb becomes one topic level, so it cannot contain separators or
/// wildcards.
fn validate_verb(verb: &str) -> Result<(), CoreError> {
    if verb.is_empty() || verb.contains(['/', '+', '#']) {
        return Err(CoreError::InvalidPayload {
            message: format!("invalid command verb {verb:?}"),
        });
    }
    Ok(())
}

// ── CommandResult ────────────────────────────────────────────────────

/// A `data_feedback` reply: `{"topic": <verb>, "state": <code>, ...}`.
///
/// `state == 0` means the device accepted the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub state: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
    /// Fields this crate doesn't model yet.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl CommandResult {
    pub fn from_payload(payload: Payload) -> Result<Self, CoreError> {
        serde_json::from_value(Value::Object(payload)).map_err(|e| CoreError::Protocol {
            message: format!("malformed data_feedback reply: {e}"),
        })
    }

    /// Whether this reply answers `verb`.
    pub fn answers(&self, verb: &str) -> bool {
        self.topic == verb
    }

    pub fn is_success(&self) -> bool {
        self.state == 0
    }

    /// `Ok(self)` when accepted, `CommandRejected` otherwise.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CoreError::CommandRejected {
                verb: self.topic.clone(),
                code: self.state,
                message: self.msg.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn light_command_serializes_all_channels() {
        let env = Command::SetLights(LightState::all_on())
            .into_envelope()
            .unwrap();
        assert_eq!(env.verb, "light_ctrl");
        assert_eq!(env.payload.len(), 7);
        assert_eq!(env.payload["led_head"], 255);
    }

    #[test]
    fn buzzer_carries_state_and_timestamp() {
        let env = Command::Buzzer { state: true }.into_envelope().unwrap();
        assert_eq!(env.verb, "cmd_buzzer");
        assert_eq!(env.payload["state"], 1);
        assert!(env.payload["timeStamp"].as_i64().unwrap() > 0);

        let stop = Command::Buzzer { state: false }.into_envelope().unwrap();
        assert_eq!(stop.payload["state"], 0);
    }

    #[test]
    fn plan_and_dock_verbs() {
        let start = Command::StartPlan {
            plan_id: "42".into(),
        }
        .into_envelope()
        .unwrap();
        assert_eq!(start.verb, "start_plan");
        assert_eq!(start.payload, obj(json!({"planId": "42"})));

        let dock = Command::ReturnToDock.into_envelope().unwrap();
        assert_eq!(dock.verb, "cmd_recharge");
        assert!(dock.payload.is_empty());
        assert!(Command::ReturnToDock.expects_ack());
        assert!(!Command::Chute { velocity: 1 }.expects_ack());
    }

    #[test]
    fn chute_velocity_is_signed() {
        let env = Command::Chute { velocity: -80 }.into_envelope().unwrap();
        assert_eq!(env.payload, obj(json!({"vel": -80})));
    }

    #[test]
    fn raw_rejects_topic_separators() {
        for bad in ["", "a/b", "x+", "#"] {
            let err = Command::Raw {
                verb: bad.into(),
                payload: Payload::new(),
            }
            .into_envelope()
            .unwrap_err();
            assert!(matches!(err, CoreError::InvalidPayload { .. }), "{bad:?}");
        }

        let ok = Command::Raw {
            verb: "set_sound_param".into(),
            payload: obj(json!({"vol": 3})),
        }
        .into_envelope()
        .unwrap();
        assert_eq!(ok.verb, "set_sound_param");
    }

    #[test]
    fn result_parses_controller_ack() {
        let res = CommandResult::from_payload(obj(
            json!({"topic": "get_controller", "state": 0, "data": {}}),
        ))
        .unwrap();
        assert!(res.answers("get_controller"));
        assert!(res.is_success());
        assert!(res.into_result().is_ok());
    }

    #[test]
    fn nonzero_state_is_rejection() {
        let res = CommandResult::from_payload(obj(
            json!({"topic": "start_plan", "state": 2, "msg": "busy", "seq": 9}),
        ))
        .unwrap();
        assert_eq!(res.extra["seq"], 9);
        let err = res.into_result().unwrap_err();
        assert!(matches!(
            err,
            CoreError::CommandRejected { ref verb, code: 2, .. } if verb == "start_plan"
        ));
    }

    #[test]
    fn non_numeric_state_is_protocol_error() {
        let err = CommandResult::from_payload(obj(json!({"topic": "x", "state": "ok"})))
            .unwrap_err();
        assert!(matches!(err, CoreError::Protocol { .. }));
    }
}
