//! Streetlight commands
//!
//! Inbound payloads are decoded exactly once, at the channel boundary, into a
//! [`Command`]. Everything past that point works with the typed command only.
//!
//! Wire format, one JSON object per message:
//!
//! ```text
//! turn.on / turn.off   {"command": "on" | "off", "sentAt": "...", "tag": 50}
//! dim                  {"percentage": 60,         "sentAt": "...", "tag": 50}
//! ```
//!
//! The command variant follows the topic; the `command` field is informational.

pub mod error;
pub mod processor;

pub use error::DecodeError;
pub use processor::{CommandProcessor, ProcessOutcome};

use crate::device::DimLevel;
use crate::telemetry::CorrelationTag;
use crate::topic::CommandAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    TurnOn,
    TurnOff,
    Dim { percentage: DimLevel },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub sent_at: DateTime<Utc>,
    pub tag: Option<CorrelationTag>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Switch {
    On,
    Off,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SwitchPayload {
    command: Switch,
    #[serde(with = "crate::timestamp")]
    sent_at: DateTime<Utc>,
    #[serde(default, alias = "my-app-header", skip_serializing_if = "Option::is_none")]
    tag: Option<CorrelationTag>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DimPayload {
    percentage: i64,
    #[serde(with = "crate::timestamp")]
    sent_at: DateTime<Utc>,
    #[serde(default, alias = "my-app-header", skip_serializing_if = "Option::is_none")]
    tag: Option<CorrelationTag>,
}

impl Command {
    pub fn turn_on(sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: CommandKind::TurnOn,
            sent_at,
            tag: None,
        }
    }

    pub fn turn_off(sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: CommandKind::TurnOff,
            sent_at,
            tag: None,
        }
    }

    pub fn dim(percentage: DimLevel, sent_at: DateTime<Utc>) -> Self {
        Self {
            kind: CommandKind::Dim { percentage },
            sent_at,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: CorrelationTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Topic action this command is published under
    pub fn action(&self) -> CommandAction {
        match self.kind {
            CommandKind::TurnOn => CommandAction::TurnOn,
            CommandKind::TurnOff => CommandAction::TurnOff,
            CommandKind::Dim { .. } => CommandAction::Dim,
        }
    }

    /// Decodes the payload of a message received on an `action` topic
    pub fn decode(action: CommandAction, payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed { action, source };

        match action {
            CommandAction::TurnOn | CommandAction::TurnOff => {
                let payload: SwitchPayload = serde_json::from_slice(payload).map_err(malformed)?;
                let expected = if action == CommandAction::TurnOn {
                    Switch::On
                } else {
                    Switch::Off
                };
                if payload.command != expected {
                    warn!(
                        "Command field {:?} contradicts {} topic, following the topic",
                        payload.command, action
                    );
                }
                let kind = if action == CommandAction::TurnOn {
                    CommandKind::TurnOn
                } else {
                    CommandKind::TurnOff
                };
                Ok(Self {
                    kind,
                    sent_at: payload.sent_at,
                    tag: payload.tag,
                })
            }
            CommandAction::Dim => {
                let payload: DimPayload = serde_json::from_slice(payload).map_err(malformed)?;
                let percentage = DimLevel::new(payload.percentage)
                    .ok_or(DecodeError::PercentageOutOfRange(payload.percentage))?;
                Ok(Self {
                    kind: CommandKind::Dim { percentage },
                    sent_at: payload.sent_at,
                    tag: payload.tag,
                })
            }
        }
    }

    /// Encodes the command into its wire payload
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self.kind {
            CommandKind::TurnOn | CommandKind::TurnOff => {
                let command = if self.kind == CommandKind::TurnOn {
                    Switch::On
                } else {
                    Switch::Off
                };
                serde_json::to_vec(&SwitchPayload {
                    command,
                    sent_at: self.sent_at,
                    tag: self.tag,
                })
            }
            CommandKind::Dim { percentage } => serde_json::to_vec(&DimPayload {
                percentage: i64::from(percentage.percent()),
                sent_at: self.sent_at,
                tag: self.tag,
            }),
        }
    }
}
