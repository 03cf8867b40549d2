//! Topic routing for streetlight commands and telemetry
//!
//! All topics share the dot-separated layout
//! `{namespace}.{domain}.{major}.{minor}.{kind}.{deviceId}.{suffix}`:
//!
//! ```text
//! smartylighting.streetlights.1.0.action.L1.turn.on        (command, consumed)
//! smartylighting.streetlights.1.0.action.L1.dim            (command, consumed)
//! smartylighting.streetlights.1.0.event.L1.lighting.measured (telemetry, produced)
//! ```
//!
//! Device id extraction is deliberately lenient: a topic that is too short to carry
//! an id resolves to [`UNKNOWN_DEVICE`] instead of failing the message.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Device id used when a topic is too short to carry one
pub const UNKNOWN_DEVICE: &str = "unknown";

/// Zero-based segment index of the device id
const DEVICE_ID_SEGMENT: usize = 5;

const TELEMETRY_SUFFIX: &str = "lighting.measured";

/// Command actions a streetlight listens for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandAction {
    TurnOn,
    TurnOff,
    Dim,
}

impl CommandAction {
    pub const ALL: [CommandAction; 3] = [Self::TurnOn, Self::TurnOff, Self::Dim];

    /// Topic suffix following the device id
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::TurnOn => "turn.on",
            Self::TurnOff => "turn.off",
            Self::Dim => "dim",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Self::TurnOn => "TURN ON",
            Self::TurnOff => "TURN OFF",
            Self::Dim => "DIM",
        };
        write!(f, "{}", label)
    }
}

/// Namespace and version prefix shared by every topic of one deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicScheme {
    pub namespace: String,
    pub domain: String,
    pub major: u32,
    pub minor: u32,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            namespace: "smartylighting".to_string(),
            domain: "streetlights".to_string(),
            major: 1,
            minor: 0,
        }
    }
}

impl TopicScheme {
    fn prefix(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.namespace, self.domain, self.major, self.minor
        )
    }

    /// Inbound command topic for one device and action
    pub fn action_topic(&self, device_id: &str, action: CommandAction) -> String {
        format!("{}.action.{}.{}", self.prefix(), device_id, action.suffix())
    }

    /// Outbound telemetry topic for one device
    pub fn telemetry_topic(&self, device_id: &str) -> String {
        format!("{}.event.{}.{}", self.prefix(), device_id, TELEMETRY_SUFFIX)
    }

    /// Whether `topic` is a command topic for `action`.
    ///
    /// Matches `{prefix}.action.<anything>.{suffix}` with a non-empty middle part,
    /// the same shape a `prefix\.action\..*\.suffix` pattern accepts.
    pub fn matches(&self, topic: &str, action: CommandAction) -> bool {
        let action_prefix = format!("{}.action.", self.prefix());
        topic
            .strip_prefix(action_prefix.as_str())
            .and_then(|rest| rest.strip_suffix(action.suffix()))
            .and_then(|middle| middle.strip_suffix('.'))
            .is_some_and(|device| !device.is_empty())
    }
}

/// Extracts the device id from the sixth dot-separated segment of `topic`.
///
/// Topics with fewer than six segments yield [`UNKNOWN_DEVICE`] and a warning.
pub fn extract_device_id(topic: &str) -> String {
    match topic.split('.').nth(DEVICE_ID_SEGMENT) {
        Some(device_id) => device_id.to_string(),
        None => {
            warn!("Could not extract streetlight id from topic: {}", topic);
            UNKNOWN_DEVICE.to_string()
        }
    }
}

/// Checks `topic` against `action` and extracts its device id.
///
/// Returns `None` if the topic is not a command topic for `action`.
pub fn route(scheme: &TopicScheme, topic: &str, action: CommandAction) -> Option<String> {
    scheme
        .matches(topic, action)
        .then(|| extract_device_id(topic))
}
