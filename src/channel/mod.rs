//! # Message Channel
//!
//! Narrow boundary between the streetlight core and the publish/subscribe broker.
//! The core only ever hands an [`OutboundMessage`] to [`MessageChannel::send`] and
//! reads [`InboundMessage`]s from the stream returned by
//! [`MessageChannel::take_inbound`]. Connection handling, authentication and
//! framing stay inside the implementations:
//!
//! ```text
//! channel/
//! ├── loopback.rs  - in-process broker used by tests and offline runs
//! └── mqtt.rs      - rumqttc-backed transport
//! ```
//!
//! ## Delivery outcomes
//!
//! `send` never waits for the broker. It returns a [`DeliveryHandle`] that resolves
//! once the broker acknowledges the message or the transport gives up on it.
//! Callers on the hot path pass the handle to [`observe`] and move on; callers that
//! must know the outcome await [`DeliveryHandle::outcome`].

pub mod loopback;
pub mod mqtt;

pub use loopback::LoopbackChannel;
pub use mqtt::MqttChannel;

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Message handed to the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    /// Partitioning key; transports without keyed delivery only log it
    pub key: String,
    pub payload: Vec<u8>,
}

/// Message received from the broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
        }
    }
}

/// Broker acknowledgement for one delivered message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub packet_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// The client refused the message before it reached the network
    #[error("Publish rejected by client: {0}")]
    Rejected(String),

    #[error("Connection lost before the broker acknowledged the message")]
    ConnectionLost,

    #[error("No acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("Failed to serialize payload: {0}")]
    Serialization(String),

    /// The transport dropped the outcome without resolving it
    #[error("Delivery outcome was dropped by the transport")]
    Dropped,
}

pub type DeliveryResult = Result<DeliveryReceipt, PublishError>;

/// Resolving end of a delivery outcome, kept by the transport
pub type DeliverySender = oneshot::Sender<DeliveryResult>;

/// Future outcome of one [`MessageChannel::send`]
#[derive(Debug)]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl DeliveryHandle {
    /// Creates an unresolved handle together with the sender that completes it
    pub fn pending() -> (DeliverySender, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Creates a handle that is already complete
    pub fn resolved(result: DeliveryResult) -> Self {
        let (tx, handle) = Self::pending();
        let _ = tx.send(result);
        handle
    }

    pub async fn outcome(self) -> DeliveryResult {
        self.rx.await.unwrap_or(Err(PublishError::Dropped))
    }
}

/// Transport used to publish telemetry and commands and to receive commands
pub trait MessageChannel: Send + Sync + 'static {
    /// Queues `message` for delivery without waiting for the broker
    fn send(&self, message: OutboundMessage) -> DeliveryHandle;

    /// Hands out the inbound message stream. Only the first call returns `Some`.
    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;
}

/// Watches a delivery outcome in the background and passes it to `on_done`.
///
/// Returns immediately. Outside a tokio runtime the outcome cannot be watched;
/// this is logged and the handle dropped.
pub fn observe<F>(handle: DeliveryHandle, on_done: F)
where
    F: FnOnce(DeliveryResult) + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { on_done(handle.outcome().await) });
        }
        Err(_) => warn!("No async runtime available, delivery outcome will not be observed"),
    }
}
