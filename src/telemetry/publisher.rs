use super::TelemetryEvent;
use crate::channel::{self, DeliveryReceipt, MessageChannel, OutboundMessage, PublishError};
use crate::topic::TopicScheme;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Publishes `lighting.measured` events for individual streetlights
#[derive(Clone)]
pub struct TelemetryPublisher {
    channel: Arc<dyn MessageChannel>,
    scheme: TopicScheme,
    ack_timeout: Duration,
}

impl TelemetryPublisher {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        scheme: TopicScheme,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            scheme,
            ack_timeout,
        }
    }

    fn outbound(
        &self,
        device_id: &str,
        event: &TelemetryEvent,
    ) -> Result<OutboundMessage, PublishError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| PublishError::Serialization(e.to_string()))?;
        Ok(OutboundMessage {
            topic: self.scheme.telemetry_topic(device_id),
            key: device_id.to_string(),
            payload,
        })
    }

    /// Hands `event` to the channel and returns without waiting for the broker.
    ///
    /// The delivery outcome is only logged. Failures are never retried.
    pub fn publish(&self, device_id: &str, event: &TelemetryEvent) {
        let message = match self.outbound(device_id, event) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping light measurement for streetlight {}: {}", device_id, e);
                return;
            }
        };

        info!(
            "Publishing light measurement for streetlight {} to topic {}",
            device_id, message.topic
        );
        debug!("Event payload: {}", event);

        let handle = self.channel.send(message);
        let device_id = device_id.to_string();
        channel::observe(handle, move |outcome| match outcome {
            Ok(receipt) => info!(
                "Successfully published light measurement for streetlight {} - packet {}",
                device_id, receipt.packet_id
            ),
            Err(e) => error!(
                "Failed to publish light measurement for streetlight {}: {}",
                device_id, e
            ),
        });
    }

    /// Publishes `event` and waits for the broker acknowledgement.
    ///
    /// Gives up with [`PublishError::Timeout`] after the configured acknowledgement timeout.
    pub async fn publish_and_wait(
        &self,
        device_id: &str,
        event: &TelemetryEvent,
    ) -> Result<DeliveryReceipt, PublishError> {
        let message = self.outbound(device_id, event)?;
        info!(
            "Publishing light measurement (sync) for streetlight {} to topic {}",
            device_id, message.topic
        );
        debug!("Event payload: {}", event);

        let receipt = timeout(self.ack_timeout, self.channel.send(message).outcome())
            .await
            .map_err(|_| PublishError::Timeout(self.ack_timeout))??;

        info!(
            "Successfully published light measurement for streetlight {} - packet {}",
            device_id, receipt.packet_id
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DeliveryHandle, InboundMessage, LoopbackChannel};
    use crate::device::DeviceState;
    use tokio::sync::mpsc;

    /// Accepts everything and never acknowledges
    struct SilentChannel {
        parked: parking_lot::Mutex<Vec<channel::DeliverySender>>,
    }

    impl MessageChannel for SilentChannel {
        fn send(&self, _message: OutboundMessage) -> DeliveryHandle {
            let (tx, handle) = DeliveryHandle::pending();
            self.parked.lock().push(tx);
            handle
        }

        fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
            None
        }
    }

    fn lit_state() -> DeviceState {
        let mut state = DeviceState::new("L1");
        state.is_on = true;
        state
    }

    #[tokio::test]
    async fn publish_targets_device_topic() {
        let channel = Arc::new(LoopbackChannel::default());
        let publisher = TelemetryPublisher::new(
            channel.clone(),
            TopicScheme::default(),
            Duration::from_secs(1),
        );

        let event = TelemetryEvent::measure(&lit_state());
        publisher.publish("L1", &event);

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].topic,
            "smartylighting.streetlights.1.0.event.L1.lighting.measured"
        );
        assert_eq!(sent[0].key, "L1");
        let decoded: TelemetryEvent = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(decoded.lumens, event.lumens);
        assert_eq!(decoded.tag, event.tag);
        assert_eq!(
            decoded.measured_at.timestamp_millis(),
            event.measured_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn publish_and_wait_returns_receipt() {
        let channel = Arc::new(LoopbackChannel::default());
        let publisher =
            TelemetryPublisher::new(channel, TopicScheme::default(), Duration::from_secs(1));

        let receipt = publisher
            .publish_and_wait("L1", &TelemetryEvent::measure(&lit_state()))
            .await
            .unwrap();
        assert!(receipt.topic.ends_with(".event.L1.lighting.measured"));
    }

    #[tokio::test]
    async fn publish_and_wait_propagates_failure() {
        let channel = Arc::new(LoopbackChannel::default());
        channel.set_failing(true);
        let publisher =
            TelemetryPublisher::new(channel, TopicScheme::default(), Duration::from_secs(1));

        let result = publisher
            .publish_and_wait("L1", &TelemetryEvent::measure(&lit_state()))
            .await;
        assert_eq!(result, Err(PublishError::ConnectionLost));
    }

    #[tokio::test]
    async fn publish_returns_while_delivery_is_pending() {
        let channel = Arc::new(SilentChannel {
            parked: parking_lot::Mutex::new(Vec::new()),
        });
        let publisher = TelemetryPublisher::new(
            channel.clone(),
            TopicScheme::default(),
            Duration::from_secs(60),
        );

        publisher.publish("L1", &TelemetryEvent::measure(&lit_state()));

        // the outcome observer is still parked on the unresolved delivery
        assert_eq!(channel.parked.lock().len(), 1);
        assert!(!channel.parked.lock()[0].is_closed());
    }

    #[tokio::test]
    async fn publish_and_wait_times_out() {
        let channel = Arc::new(SilentChannel {
            parked: parking_lot::Mutex::new(Vec::new()),
        });
        let publisher = TelemetryPublisher::new(
            channel,
            TopicScheme::default(),
            Duration::from_millis(20),
        );

        let result = publisher
            .publish_and_wait("L1", &TelemetryEvent::measure(&lit_state()))
            .await;
        assert_eq!(result, Err(PublishError::Timeout(Duration::from_millis(20))));
    }
}
