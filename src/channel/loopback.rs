//! In-process broker
//!
//! Acknowledges every message immediately, remembers what was sent and echoes
//! it back on the inbound stream, which is what a broker does for a client
//! subscribed to its own topics. Can be switched to reject all sends.

use super::{
    DeliveryHandle, DeliveryReceipt, InboundMessage, MessageChannel, OutboundMessage, PublishError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct LoopbackChannel {
    sent: Mutex<Vec<OutboundMessage>>,
    next_packet_id: AtomicU16,
    failing: AtomicBool,
    echo_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl LoopbackChannel {
    pub fn new(capacity: usize) -> Self {
        let (echo_tx, inbound_rx) = mpsc::channel(capacity);
        Self {
            sent: Mutex::new(Vec::new()),
            next_packet_id: AtomicU16::new(1),
            failing: AtomicBool::new(false),
            echo_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Makes every following send fail with [`PublishError::ConnectionLost`]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every message handed to [`MessageChannel::send`] so far, failed ones included
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Sent messages whose topic ends with `suffix`
    pub fn sent_with_suffix(&self, suffix: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.topic.ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Delivers `message` to the inbound stream as if another client had published it
    pub async fn inject(&self, message: InboundMessage) -> bool {
        self.echo_tx.send(message).await.is_ok()
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MessageChannel for LoopbackChannel {
    fn send(&self, message: OutboundMessage) -> DeliveryHandle {
        self.sent.lock().push(message.clone());

        if self.failing.load(Ordering::SeqCst) {
            debug!("Loopback rejecting message for {}", message.topic);
            return DeliveryHandle::resolved(Err(PublishError::ConnectionLost));
        }

        let packet_id = self.next_packet_id.fetch_add(1, Ordering::SeqCst);
        let receipt = DeliveryReceipt {
            topic: message.topic.clone(),
            packet_id,
        };

        let echo = InboundMessage {
            topic: message.topic,
            key: Some(message.key),
            payload: message.payload,
        };
        if let Err(e) = self.echo_tx.try_send(echo) {
            warn!("Loopback inbound queue unavailable, message not echoed: {}", e);
        }

        DeliveryHandle::resolved(Ok(receipt))
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}
