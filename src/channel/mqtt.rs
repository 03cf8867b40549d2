//! MQTT transport built on rumqttc
//!
//! A background task drives the rumqttc event loop. It forwards incoming publishes
//! to the inbound queue, re-subscribes on every connection acknowledgement and
//! resolves delivery handles as the broker acknowledges packets.
//!
//! rumqttc only reports a packet id once a publish leaves the event loop, so
//! pending deliveries are matched in two steps:
//!
//! ```text
//! send()  ──► queued (FIFO) ──[Outgoing::Publish(pkid)]──► in flight ──[PubAck/PubComp]──► Ok
//!                                                              │
//!                                                  shutdown ───┴──► Err(ConnectionLost)
//! ```
//!
//! A connection error fails nothing. rumqttc keeps unacknowledged publishes and
//! unread requests and replays them after reconnecting; in-flight publishes keep
//! their packet id, so an outgoing id that is already in flight is a replay.

use super::{
    DeliveryHandle, DeliveryReceipt, DeliverySender, InboundMessage, MessageChannel,
    OutboundMessage, PublishError,
};
use crate::config::BrokerConfig;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const REQUEST_CAPACITY: usize = 100;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Maps a configured QoS level to rumqttc's enum, falling back to at-least-once
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        other => {
            warn!("Unsupported QoS level {}, using 1", other);
            QoS::AtLeastOnce
        }
    }
}

struct Pending {
    topic: String,
    tx: DeliverySender,
}

impl Pending {
    fn resolve(self, packet_id: u16) {
        let receipt = DeliveryReceipt {
            topic: self.topic,
            packet_id,
        };
        let _ = self.tx.send(Ok(receipt));
    }

    fn fail(self, err: PublishError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Deliveries waiting for a packet id or an acknowledgement
#[derive(Default)]
struct PendingDeliveries {
    queued: VecDeque<Pending>,
    in_flight: HashMap<u16, Pending>,
}

impl PendingDeliveries {
    /// The oldest queued publish left the event loop as `packet_id`
    fn dispatched(&mut self, packet_id: u16, qos: QoS) {
        if qos != QoS::AtMostOnce && self.in_flight.contains_key(&packet_id) {
            debug!("Publish {} retransmitted after reconnect", packet_id);
            return;
        }
        let Some(pending) = self.queued.pop_front() else {
            debug!("Untracked outgoing publish {}", packet_id);
            return;
        };
        if qos == QoS::AtMostOnce {
            // nothing further will be acknowledged
            pending.resolve(packet_id);
        } else {
            self.in_flight.insert(packet_id, pending);
        }
    }

    fn acknowledged(&mut self, packet_id: u16) {
        match self.in_flight.remove(&packet_id) {
            Some(pending) => pending.resolve(packet_id),
            None => debug!("Acknowledgement for untracked packet {}", packet_id),
        }
    }

    fn len(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    fn fail_all(&mut self, err: PublishError) {
        let count = self.len();
        if count > 0 {
            warn!("Failing {} pending deliveries: {}", count, err);
        }
        for pending in self.queued.drain(..) {
            pending.fail(err.clone());
        }
        for (_, pending) in self.in_flight.drain() {
            pending.fail(err.clone());
        }
    }
}

pub struct MqttChannel {
    client: AsyncClient,
    qos: QoS,
    pending: Arc<Mutex<PendingDeliveries>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    cancel: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttChannel {
    /// Creates the client and spawns its event loop. Must be called inside a tokio runtime.
    pub fn start(config: &BrokerConfig, inbound_capacity: usize) -> Self {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if let Some((username, password)) = config.credentials() {
            debug!("Using broker credentials for user {}", username);
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        let pending = Arc::new(Mutex::new(PendingDeliveries::default()));
        let cancel = CancellationToken::new();
        let qos = qos_from_level(config.qos);

        info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host, config.port, config.client_id
        );

        let driver = EventLoopDriver {
            client: client.clone(),
            subscribe_filter: config.subscribe_filter.clone(),
            qos,
            pending: pending.clone(),
            inbound_tx,
        };
        let handle = tokio::spawn(driver.run(event_loop, cancel.clone()));

        Self {
            client,
            qos,
            pending,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            cancel,
            event_loop: Mutex::new(Some(handle)),
        }
    }

    /// Stops the event loop and fails every delivery still pending
    pub async fn shutdown(&self) {
        info!("Disconnecting from MQTT broker");
        if let Err(e) = self.client.try_disconnect() {
            warn!("Disconnect request failed: {}", e);
        }
        self.cancel.cancel();

        let handle = self.event_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("MQTT event loop task panicked: {}", e);
            }
        }
        self.pending.lock().fail_all(PublishError::ConnectionLost);
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl MessageChannel for MqttChannel {
    fn send(&self, message: OutboundMessage) -> DeliveryHandle {
        let (tx, handle) = DeliveryHandle::pending();
        debug!("Queueing publish to {} (key {})", message.topic, message.key);

        // Held across try_publish so queue order matches request order
        let mut pending = self.pending.lock();
        match self
            .client
            .try_publish(message.topic.clone(), self.qos, false, message.payload)
        {
            Ok(()) => pending.queued.push_back(Pending {
                topic: message.topic,
                tx,
            }),
            Err(e) => {
                let _ = tx.send(Err(PublishError::Rejected(e.to_string())));
            }
        }
        handle
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }
}

struct EventLoopDriver {
    client: AsyncClient,
    subscribe_filter: String,
    qos: QoS,
    pending: Arc<Mutex<PendingDeliveries>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl EventLoopDriver {
    async fn run(self, mut event_loop: EventLoop, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("MQTT event loop stopped");
                    break;
                }

                event = event_loop.poll() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        let waiting = self.pending.lock().len();
                        if waiting > 0 {
                            warn!("{} deliveries waiting for reconnect", waiting);
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("MQTT connection acknowledged, subscribing to {}", self.subscribe_filter);
                if let Err(e) = self
                    .client
                    .try_subscribe(self.subscribe_filter.clone(), self.qos)
                {
                    error!("Failed to subscribe to {}: {}", self.subscribe_filter, e);
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                debug!(
                    "Received MQTT message on topic: {}, payload length: {}",
                    publish.topic,
                    publish.payload.len()
                );
                let message = InboundMessage {
                    topic: publish.topic.to_string(),
                    key: None,
                    payload: publish.payload.to_vec(),
                };
                if self.inbound_tx.send(message).await.is_err() {
                    warn!("Inbound queue closed, dropping message");
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                self.pending.lock().acknowledged(ack.pkid);
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                self.pending.lock().acknowledged(comp.pkid);
            }
            Event::Outgoing(Outgoing::Publish(packet_id)) => {
                self.pending.lock().dispatched(packet_id, self.qos);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(topic: &str) -> (Pending, DeliveryHandle) {
        let (tx, handle) = DeliveryHandle::pending();
        (
            Pending {
                topic: topic.to_string(),
                tx,
            },
            handle,
        )
    }

    #[tokio::test]
    async fn acknowledgement_resolves_in_send_order() {
        let mut deliveries = PendingDeliveries::default();
        let (first, first_handle) = pending("a");
        let (second, second_handle) = pending("b");
        deliveries.queued.push_back(first);
        deliveries.queued.push_back(second);

        deliveries.dispatched(7, QoS::AtLeastOnce);
        deliveries.dispatched(8, QoS::AtLeastOnce);
        deliveries.acknowledged(8);
        deliveries.acknowledged(7);

        let first = first_handle.outcome().await.unwrap();
        let second = second_handle.outcome().await.unwrap();
        assert_eq!((first.topic.as_str(), first.packet_id), ("a", 7));
        assert_eq!((second.topic.as_str(), second.packet_id), ("b", 8));
    }

    #[tokio::test]
    async fn qos0_resolves_on_dispatch() {
        let mut deliveries = PendingDeliveries::default();
        let (entry, handle) = pending("a");
        deliveries.queued.push_back(entry);

        deliveries.dispatched(0, QoS::AtMostOnce);
        assert!(deliveries.in_flight.is_empty());
        assert_eq!(handle.outcome().await.unwrap().packet_id, 0);
    }

    #[tokio::test]
    async fn replay_after_reconnect_resolves_original_delivery() {
        let mut deliveries = PendingDeliveries::default();
        let (first, first_handle) = pending("a");
        deliveries.queued.push_back(first);
        deliveries.dispatched(1, QoS::AtLeastOnce);

        // connection drops, a new send is queued, then rumqttc replays packet 1
        let (second, second_handle) = pending("b");
        deliveries.queued.push_back(second);
        deliveries.dispatched(1, QoS::AtLeastOnce);
        deliveries.acknowledged(1);

        let first = first_handle.outcome().await.unwrap();
        assert_eq!((first.topic.as_str(), first.packet_id), ("a", 1));
        assert_eq!(deliveries.queued.len(), 1);
        assert!(deliveries.in_flight.is_empty());

        deliveries.dispatched(2, QoS::AtLeastOnce);
        deliveries.acknowledged(2);
        let second = second_handle.outcome().await.unwrap();
        assert_eq!((second.topic.as_str(), second.packet_id), ("b", 2));
    }

    #[tokio::test]
    async fn acknowledged_packet_id_can_be_reused() {
        let mut deliveries = PendingDeliveries::default();
        let (first, first_handle) = pending("a");
        let (second, second_handle) = pending("b");
        deliveries.queued.push_back(first);
        deliveries.queued.push_back(second);

        deliveries.dispatched(1, QoS::AtLeastOnce);
        deliveries.acknowledged(1);
        deliveries.dispatched(1, QoS::AtLeastOnce);
        deliveries.acknowledged(1);

        assert_eq!(first_handle.outcome().await.unwrap().topic, "a");
        assert_eq!(second_handle.outcome().await.unwrap().topic, "b");
    }

    #[tokio::test]
    async fn shutdown_fails_everything() {
        let mut deliveries = PendingDeliveries::default();
        let (queued, queued_handle) = pending("a");
        let (flying, flying_handle) = pending("b");
        deliveries.queued.push_back(flying);
        deliveries.dispatched(3, QoS::AtLeastOnce);
        deliveries.queued.push_back(queued);

        deliveries.fail_all(PublishError::ConnectionLost);

        assert_eq!(queued_handle.outcome().await, Err(PublishError::ConnectionLost));
        assert_eq!(flying_handle.outcome().await, Err(PublishError::ConnectionLost));
    }

    #[test]
    fn qos_levels_map() {
        assert_eq!(qos_from_level(0), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_level(9), QoS::AtLeastOnce);
    }
}
