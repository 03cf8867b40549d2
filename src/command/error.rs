//! Errors raised while turning an inbound payload into a [`Command`](super::Command)

use crate::topic::CommandAction;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON or lacks required fields
    #[error("Malformed {action} payload: {source}")]
    Malformed {
        action: CommandAction,
        source: serde_json::Error,
    },

    /// Dim percentage outside 0..=100
    #[error("Percentage must be between 0 and 100, got {0}")]
    PercentageOutOfRange(i64),
}
