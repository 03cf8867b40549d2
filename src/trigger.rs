//! Request surface for operators and HTTP adapters
//!
//! Commands requested here are published onto the inbound command topics, so
//! they travel the same path as commands sent by any other client. Measurements
//! and state queries go straight to the processor and store.

use crate::channel::{self, MessageChannel, OutboundMessage};
use crate::command::{Command, CommandProcessor, ProcessOutcome};
use crate::device::{DeviceState, DimLevel};
use crate::telemetry::CorrelationTag;
use crate::topic::TopicScheme;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

const SERVICE_NAME: &str = "Streetlights MQTT API";

/// Tag attached to commands requested through this surface
const REQUEST_TAG: CorrelationTag = CorrelationTag::fixed(50);

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Percentage must be between 0 and 100, got {0}")]
    InvalidPercentage(i64),

    #[error("Streetlight {0} not found")]
    NotFound(String),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Confirmation that a command was handed to the channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandTicket {
    pub topic: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub service: String,
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CommandTrigger {
    scheme: TopicScheme,
    channel: Arc<dyn MessageChannel>,
    processor: Arc<CommandProcessor>,
}

impl CommandTrigger {
    pub fn new(
        scheme: TopicScheme,
        channel: Arc<dyn MessageChannel>,
        processor: Arc<CommandProcessor>,
    ) -> Self {
        Self {
            scheme,
            channel,
            processor,
        }
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "UP".to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn request_turn_on(&self, device_id: &str) -> Result<CommandTicket, TriggerError> {
        let ticket = self.send_command(device_id, Command::turn_on(Utc::now()))?;
        Ok(CommandTicket {
            message: format!("Turn ON command sent to streetlight {}", device_id),
            ..ticket
        })
    }

    pub fn request_turn_off(&self, device_id: &str) -> Result<CommandTicket, TriggerError> {
        let ticket = self.send_command(device_id, Command::turn_off(Utc::now()))?;
        Ok(CommandTicket {
            message: format!("Turn OFF command sent to streetlight {}", device_id),
            ..ticket
        })
    }

    /// Validates `percentage` and publishes a dim command; nothing is sent when invalid
    pub fn request_dim(
        &self,
        device_id: &str,
        percentage: i64,
    ) -> Result<CommandTicket, TriggerError> {
        let level = DimLevel::new(percentage).ok_or(TriggerError::InvalidPercentage(percentage))?;
        let ticket = self.send_command(device_id, Command::dim(level, Utc::now()))?;
        Ok(CommandTicket {
            message: format!(
                "Dim command sent to streetlight {} - {}",
                device_id, level
            ),
            ..ticket
        })
    }

    /// Publishes the current light output of `device_id` right away
    pub fn measure(&self, device_id: &str) -> ProcessOutcome {
        info!(
            "Triggering manual light measurement for streetlight: {}",
            device_id
        );
        self.processor.measure_now(device_id)
    }

    pub fn state(&self, device_id: &str) -> Result<DeviceState, TriggerError> {
        self.processor
            .store()
            .get(device_id)
            .ok_or_else(|| TriggerError::NotFound(device_id.to_string()))
    }

    pub fn states(&self) -> HashMap<String, DeviceState> {
        self.processor.store().snapshot_all()
    }

    fn send_command(
        &self,
        device_id: &str,
        command: Command,
    ) -> Result<CommandTicket, TriggerError> {
        let command = command.with_tag(REQUEST_TAG);
        let topic = self.scheme.action_topic(device_id, command.action());
        let payload = command.encode()?;

        info!("Sending {} command to topic: {}", command.action(), topic);
        let handle = self.channel.send(OutboundMessage {
            topic: topic.clone(),
            key: device_id.to_string(),
            payload,
        });

        let failed_topic = topic.clone();
        channel::observe(handle, move |outcome| {
            if let Err(e) = outcome {
                error!("Failed to send command to topic {}: {}", failed_topic, e);
            }
        });

        Ok(CommandTicket {
            topic,
            message: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannel;
    use crate::device::DeviceStateStore;
    use crate::telemetry::TelemetryPublisher;
    use std::time::Duration;

    fn trigger() -> (CommandTrigger, Arc<LoopbackChannel>) {
        let channel = Arc::new(LoopbackChannel::new(100));
        let scheme = TopicScheme::default();
        let publisher =
            TelemetryPublisher::new(channel.clone(), scheme.clone(), Duration::from_secs(1));
        let processor = Arc::new(CommandProcessor::new(
            Arc::new(DeviceStateStore::new()),
            publisher,
        ));
        (
            CommandTrigger::new(scheme, channel.clone(), processor),
            channel,
        )
    }

    #[tokio::test]
    async fn turn_on_request_publishes_command() {
        let (trigger, channel) = trigger();

        let ticket = trigger.request_turn_on("L1").unwrap();

        assert_eq!(
            ticket.topic,
            "smartylighting.streetlights.1.0.action.L1.turn.on"
        );
        assert!(ticket.message.contains("Turn ON"));
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(json["command"], "on");
        assert_eq!(json["tag"], 50);
    }

    #[tokio::test]
    async fn invalid_dim_is_rejected_before_publishing() {
        let (trigger, channel) = trigger();

        assert!(matches!(
            trigger.request_dim("L1", 101),
            Err(TriggerError::InvalidPercentage(101))
        ));
        assert!(matches!(
            trigger.request_dim("L1", -5),
            Err(TriggerError::InvalidPercentage(-5))
        ));
        assert!(channel.sent().is_empty());
        assert!(trigger.states().is_empty());
    }

    #[tokio::test]
    async fn unknown_state_is_not_found() {
        let (trigger, _channel) = trigger();
        assert!(matches!(
            trigger.state("ghost"),
            Err(TriggerError::NotFound(_))
        ));

        trigger.measure("ghost");
        assert!(trigger.state("ghost").is_ok());
    }

    #[test]
    fn health_reports_up() {
        let (trigger, _channel) = trigger();

        let json = serde_json::to_value(trigger.health()).unwrap();
        assert_eq!(json["status"], "UP");
        let timestamp = json["timestamp"].as_str().unwrap();
        assert_eq!(timestamp.len(), "2024-05-01T10:15:30.000Z".len());
        assert!(timestamp.ends_with('Z'));
    }
}
