// ── Topic scheme ──
//
// Commands go to `<ns>/<serial>/app/<verb>`, feedback comes back on
// `<ns>/<serial>/device/<leaf>`. Discovery sniffs `<ns>/+/device/<leaf>`
// before the serial is known.

use std::fmt;

/// Namespace every Yarbo firmware publishes under.
pub const DEFAULT_NAMESPACE: &str = "snowbot";

/// Command verbs (the last segment of an `app` topic).
pub mod verb {
    pub const GET_CONTROLLER: &str = "get_controller";
    pub const LIGHT_CTRL: &str = "light_ctrl";
    pub const CMD_BUZZER: &str = "cmd_buzzer";
    pub const CMD_CHUTE: &str = "cmd_chute";
    pub const START_PLAN: &str = "start_plan";
    pub const STOP_PLAN: &str = "stop_plan";
    pub const PAUSE_PLAN: &str = "pause_plan";
    pub const RESUME_PLAN: &str = "resume_plan";
    pub const CMD_RECHARGE: &str = "cmd_recharge";
    pub const EMERGENCY_STOP: &str = "emergency_stop_active";
    pub const EMERGENCY_UNLOCK: &str = "emergency_unlock";
    pub const HEAD_LIGHT: &str = "head_light";
    pub const ROOF_LIGHTS: &str = "roof_lights_enable";
}

/// Feedback leaves (the last segment of a `device` topic).
pub mod leaf {
    /// Full nested telemetry snapshot, roughly 1-2 Hz.
    pub const DEVICE_MSG: &str = "DeviceMSG";
    /// Plain (uncompressed) JSON liveness ping.
    pub const HEART_BEAT: &str = "heart_beat";
    /// Command acknowledgements: `{"topic": <verb>, "state": <code>, ...}`.
    pub const DATA_FEEDBACK: &str = "data_feedback";
    pub const PLAN_FEEDBACK: &str = "plan_feedback";
    pub const RECHARGE_FEEDBACK: &str = "recharge_feedback";
    pub const OTA_FEEDBACK: &str = "ota_feedback";
    pub const PATROL_FEEDBACK: &str = "patrol_feedback";
    pub const CLOUD_POINTS_FEEDBACK: &str = "cloud_points_feedback";
    pub const DEVICEINFO_FEEDBACK: &str = "deviceinfo_feedback";
    pub const LOG_FEEDBACK: &str = "log_feedback";
    /// Device property report.
    pub const A_PROPERTY_FEEDBACK: &str = "a_property_1_feedback";
}

/// Leaves a session subscribes to by default.
pub const FEEDBACK_LEAVES: &[&str] = &[
    leaf::DEVICE_MSG,
    leaf::HEART_BEAT,
    leaf::DATA_FEEDBACK,
    leaf::PLAN_FEEDBACK,
    leaf::RECHARGE_FEEDBACK,
    leaf::OTA_FEEDBACK,
    leaf::PATROL_FEEDBACK,
    leaf::CLOUD_POINTS_FEEDBACK,
    leaf::DEVICEINFO_FEEDBACK,
    leaf::LOG_FEEDBACK,
    leaf::A_PROPERTY_FEEDBACK,
];

/// Leaves sniffed during discovery to learn a serial number.
pub const SNIFF_LEAVES: &[&str] = &[leaf::DEVICE_MSG, leaf::DATA_FEEDBACK];

const APP: &str = "app";
const DEVICE: &str = "device";

// ── TopicBuilder ─────────────────────────────────────────────────────

/// Formats topics for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    namespace: String,
    serial: String,
}

impl TopicBuilder {
    pub fn new(namespace: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            serial: serial.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// `<ns>/<serial>/app/<verb>`
    pub fn command(&self, verb: &str) -> String {
        format!("{}/{}/{APP}/{verb}", self.namespace, self.serial)
    }

    /// `<ns>/<serial>/device/<leaf>`
    pub fn feedback(&self, leaf: &str) -> String {
        format!("{}/{}/{DEVICE}/{leaf}", self.namespace, self.serial)
    }

    /// `<ns>/<serial>/device/#`
    pub fn all_feedback(&self) -> String {
        format!("{}/{}/{DEVICE}/#", self.namespace, self.serial)
    }
}

/// `<ns>/+/device/<leaf>`, used before the serial is known.
pub fn wildcard_feedback(namespace: &str, leaf: &str) -> String {
    format!("{namespace}/+/{DEVICE}/{leaf}")
}

// ── Parsing ──────────────────────────────────────────────────────────

/// Which side published a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to device (`app`).
    App,
    /// Device to client (`device`).
    Device,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::App => APP,
            Self::Device => DEVICE,
        })
    }
}

/// Components of a concrete (non-wildcard) topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicParts<'a> {
    pub namespace: &'a str,
    pub serial: &'a str,
    pub direction: Direction,
    pub leaf: &'a str,
}

/// Split `<ns>/<serial>/<app|device>/<leaf>` into its parts.
///
/// Returns `None` for anything with a different shape or an empty serial.
pub fn parse_topic(topic: &str) -> Option<TopicParts<'_>> {
    let mut parts = topic.split('/');
    let namespace = parts.next()?;
    let serial = parts.next()?;
    let direction = match parts.next()? {
        APP => Direction::App,
        DEVICE => Direction::Device,
        _ => return None,
    };
    let leaf = parts.next()?;
    if parts.next().is_some() || namespace.is_empty() || serial.is_empty() || leaf.is_empty() {
        return None;
    }
    Some(TopicParts {
        namespace,
        serial,
        direction,
        leaf,
    })
}

/// Last path segment of a topic.
pub fn leaf_of(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}

/// MQTT topic-filter matching (`+` single level, trailing `#` multi level).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_command_and_feedback_topics() {
        let topics = TopicBuilder::new(DEFAULT_NAMESPACE, "24400102L8HO5227");
        assert_eq!(
            topics.command(verb::LIGHT_CTRL),
            "snowbot/24400102L8HO5227/app/light_ctrl"
        );
        assert_eq!(
            topics.feedback(leaf::DEVICE_MSG),
            "snowbot/24400102L8HO5227/device/DeviceMSG"
        );
        assert_eq!(topics.all_feedback(), "snowbot/24400102L8HO5227/device/#");
    }

    #[test]
    fn builds_wildcard() {
        assert_eq!(
            wildcard_feedback("snowbot", leaf::DATA_FEEDBACK),
            "snowbot/+/device/data_feedback"
        );
    }

    #[test]
    fn parses_device_topic() {
        let parts = parse_topic("snowbot/ABC123/device/heart_beat").unwrap();
        assert_eq!(parts.namespace, "snowbot");
        assert_eq!(parts.serial, "ABC123");
        assert_eq!(parts.direction, Direction::Device);
        assert_eq!(parts.leaf, "heart_beat");
    }

    #[test]
    fn rejects_malformed_topics() {
        assert!(parse_topic("snowbot/ABC123/device").is_none());
        assert!(parse_topic("snowbot//device/DeviceMSG").is_none());
        assert!(parse_topic("snowbot/ABC123/cloud/DeviceMSG").is_none());
        assert!(parse_topic("snowbot/ABC123/device/DeviceMSG/extra").is_none());
    }

    #[test]
    fn filter_matching() {
        assert!(matches_filter("snowbot/+/device/DeviceMSG", "snowbot/X/device/DeviceMSG"));
        assert!(!matches_filter("snowbot/+/device/DeviceMSG", "snowbot/X/device/heart_beat"));
        assert!(matches_filter("snowbot/X/device/#", "snowbot/X/device/heart_beat"));
        assert!(matches_filter("#", "anything/at/all"));
        assert!(!matches_filter("snowbot/X/device", "snowbot/X/device/DeviceMSG"));
        assert!(!matches_filter("snowbot/X/device/DeviceMSG/x", "snowbot/X/device/DeviceMSG"));
    }

    #[test]
    fn default_leaves_cover_every_feedback_channel() {
        for leaf in [
            leaf::DEVICE_MSG,
            leaf::HEART_BEAT,
            leaf::DATA_FEEDBACK,
            leaf::PLAN_FEEDBACK,
            "a_property_1_feedback",
        ] {
            assert!(FEEDBACK_LEAVES.contains(&leaf), "missing {leaf}");
        }
        assert_eq!(FEEDBACK_LEAVES.len(), 11);
    }

    #[test]
    fn leaf_of_topic() {
        assert_eq!(leaf_of("snowbot/X/device/DeviceMSG"), "DeviceMSG");
        assert_eq!(leaf_of("bare"), "bare");
    }
}
