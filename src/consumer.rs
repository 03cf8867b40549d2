//! Command Consumer - turns inbound messages into processor calls
//!
//! ```text
//! InboundMessage ──► topic::route (per action) ──► Command::decode ──► CommandProcessor
//!                        │                                │
//!                   (not a command:                 (decode failure:
//!                    ignored)                        logged, dropped)
//! ```
//!
//! A single message failing never stops consumption; [`CommandConsumer::process`]
//! logs every failure and returns.

use crate::channel::InboundMessage;
use crate::command::{Command, CommandProcessor, DecodeError, ProcessOutcome};
use crate::topic::{self, CommandAction, TopicScheme};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Topic is not one of the command topics
    #[error("Topic {0} is not a command topic")]
    Unrouted(String),

    #[error("Failed to process {action} command from topic {topic}: {source}")]
    Decode {
        action: CommandAction,
        topic: String,
        source: DecodeError,
    },
}

#[derive(Clone)]
pub struct CommandConsumer {
    scheme: TopicScheme,
    processor: Arc<CommandProcessor>,
}

impl CommandConsumer {
    pub fn new(scheme: TopicScheme, processor: Arc<CommandProcessor>) -> Self {
        Self { scheme, processor }
    }

    /// Routes, decodes and applies one message
    pub fn handle(&self, message: &InboundMessage) -> Result<ProcessOutcome, ConsumeError> {
        let (action, device_id) = CommandAction::ALL
            .into_iter()
            .find_map(|action| {
                topic::route(&self.scheme, &message.topic, action).map(|id| (action, id))
            })
            .ok_or_else(|| ConsumeError::Unrouted(message.topic.clone()))?;

        info!("Received {} command from topic: {}", action, message.topic);
        debug!(
            "Message key: {:?}, Payload: {}",
            message.key,
            String::from_utf8_lossy(&message.payload)
        );

        let command =
            Command::decode(action, &message.payload).map_err(|source| ConsumeError::Decode {
                action,
                topic: message.topic.clone(),
                source,
            })?;
        debug!("Parsed command: {:?}", command);

        let outcome = self.processor.apply(&device_id, &command);
        info!(
            "Successfully processed {} command for streetlight: {}",
            action, device_id
        );
        Ok(outcome)
    }

    /// Like [`handle`](Self::handle), but logs failures instead of returning them
    pub fn process(&self, message: &InboundMessage) -> Option<ProcessOutcome> {
        match self.handle(message) {
            Ok(outcome) => Some(outcome),
            Err(ConsumeError::Unrouted(topic)) => {
                debug!("Ignoring message on topic {}", topic);
                None
            }
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }
}
