//! Command Processor - applies commands to device state
//!
//! Every operation follows the same steps: fetch or create the device state,
//! change it, store it back, then decide whether a `lighting.measured` event
//! goes out. Telemetry is always published, with one exception: the first
//! `turn_on` a device ever receives stays silent.
//!
//! | operation     | state change                   | telemetry                 |
//! |---------------|--------------------------------|---------------------------|
//! | `turn_on`     | `is_on = true`                 | skipped on first contact  |
//! | `turn_off`    | `is_on = false`                | always                    |
//! | `dim`         | `dim_percentage = p`           | always                    |
//! | `measure_now` | none                           | always                    |
//!
//! Publishing never blocks and its outcome never flows back here; a stored
//! state change stands even if the telemetry for it is lost.

use super::{Command, CommandKind};
use crate::device::{DeviceState, DeviceStateStore, DimLevel};
use crate::telemetry::{TelemetryEvent, TelemetryPublisher};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State after a command and the telemetry event it produced, if any
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub state: DeviceState,
    pub telemetry: Option<TelemetryEvent>,
}

pub struct CommandProcessor {
    store: Arc<DeviceStateStore>,
    publisher: TelemetryPublisher,
}

impl CommandProcessor {
    pub fn new(store: Arc<DeviceStateStore>, publisher: TelemetryPublisher) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    /// Applies `command` to `device_id`
    pub fn apply(&self, device_id: &str, command: &Command) -> ProcessOutcome {
        match command.kind {
            CommandKind::TurnOn => self.turn_on(device_id, command.sent_at),
            CommandKind::TurnOff => self.turn_off(device_id, command.sent_at),
            CommandKind::Dim { percentage } => self.dim(device_id, percentage, command.sent_at),
        }
    }

    /// Switches the light on.
    ///
    /// A device seen for the first time is switched on without publishing telemetry.
    pub fn turn_on(&self, device_id: &str, sent_at: DateTime<Utc>) -> ProcessOutcome {
        info!("Processing TURN ON command for streetlight: {}", device_id);

        let mut state = self.store.get_or_create(device_id);
        let first_contact = state.is_pristine();

        state.is_on = true;
        state.last_command_at = Some(sent_at);
        self.store.put(device_id, state.clone());

        info!("Streetlight {} is now ON", device_id);

        if first_contact {
            warn!(
                "Skipping light measurement publish for newly created state: {}",
                device_id
            );
            return ProcessOutcome {
                state,
                telemetry: None,
            };
        }

        self.emit(device_id, state)
    }

    pub fn turn_off(&self, device_id: &str, sent_at: DateTime<Utc>) -> ProcessOutcome {
        info!("Processing TURN OFF command for streetlight: {}", device_id);

        let mut state = self.store.get_or_create(device_id);
        state.is_on = false;
        state.last_command_at = Some(sent_at);
        self.store.put(device_id, state.clone());

        info!("Streetlight {} is now OFF", device_id);
        self.emit(device_id, state)
    }

    /// Sets the brightness; `percentage` is already range-checked by its type
    pub fn dim(
        &self,
        device_id: &str,
        percentage: DimLevel,
        sent_at: DateTime<Utc>,
    ) -> ProcessOutcome {
        info!(
            "Processing DIM command for streetlight {} to {}",
            device_id, percentage
        );

        let mut state = self.store.get_or_create(device_id);
        state.dim_percentage = percentage;
        state.last_command_at = Some(sent_at);
        self.store.put(device_id, state.clone());

        info!("Streetlight {} dimmed to {}", device_id, percentage);
        self.emit(device_id, state)
    }

    /// Publishes the current light output without touching the state
    pub fn measure_now(&self, device_id: &str) -> ProcessOutcome {
        info!(
            "Manually triggering light measurement for streetlight: {}",
            device_id
        );
        let state = self.store.get_or_create(device_id);
        self.emit(device_id, state)
    }

    fn emit(&self, device_id: &str, state: DeviceState) -> ProcessOutcome {
        let event = TelemetryEvent::measure(&state);
        debug!(
            "Publishing light measurement: {} lumens for streetlight {}",
            event.lumens, device_id
        );
        self.publisher.publish(device_id, &event);

        ProcessOutcome {
            state,
            telemetry: Some(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        DeliveryHandle, DeliverySender, InboundMessage, LoopbackChannel, MessageChannel,
        OutboundMessage,
    };
    use crate::topic::TopicScheme;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn processor() -> (CommandProcessor, Arc<LoopbackChannel>) {
        let channel = Arc::new(LoopbackChannel::new(1000));
        let publisher = TelemetryPublisher::new(
            channel.clone(),
            TopicScheme::default(),
            Duration::from_secs(1),
        );
        (
            CommandProcessor::new(Arc::new(DeviceStateStore::new()), publisher),
            channel,
        )
    }

    #[tokio::test]
    async fn first_turn_on_is_silent() {
        let (processor, channel) = processor();

        let outcome = processor.turn_on("fresh", Utc::now());

        assert!(outcome.state.is_on);
        assert_eq!(outcome.state.dim_percentage.percent(), 100);
        assert!(outcome.telemetry.is_none());
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn later_turn_on_reports() {
        let (processor, channel) = processor();

        processor.turn_on("L1", Utc::now());
        let outcome = processor.turn_on("L1", Utc::now());

        assert_eq!(outcome.telemetry.map(|e| e.lumens), Some(5000));
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn turn_on_after_other_command_reports() {
        let (processor, channel) = processor();

        processor.dim("L1", DimLevel::new(40).unwrap(), Utc::now());
        let outcome = processor.turn_on("L1", Utc::now());

        assert_eq!(outcome.telemetry.map(|e| e.lumens), Some(2000));
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn turn_off_reports_even_on_first_contact() {
        let (processor, channel) = processor();

        let outcome = processor.turn_off("fresh", Utc::now());

        assert!(!outcome.state.is_on);
        assert_eq!(outcome.telemetry.map(|e| e.lumens), Some(0));
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn repeated_turn_off_is_not_deduplicated() {
        let (processor, channel) = processor();

        let first = processor.turn_off("L1", Utc::now());
        let second = processor.turn_off("L1", Utc::now());

        assert!(!first.state.is_on && !second.state.is_on);
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn measure_now_does_not_mutate() {
        let (processor, channel) = processor();

        let outcome = processor.measure_now("L9");

        assert_eq!(outcome.state, DeviceState::new("L9"));
        assert_eq!(outcome.telemetry.map(|e| e.lumens), Some(0));
        assert!(processor.store().get("L9").unwrap().is_pristine());
        assert_eq!(channel.sent().len(), 1);

        // a measurement is not a command, so the next turn_on is still first contact
        assert!(processor.turn_on("L9", Utc::now()).telemetry.is_none());
    }

    #[tokio::test]
    async fn records_sent_at_without_reordering() {
        let (processor, _channel) = processor();
        let later = Utc::now();
        let earlier = later - ChronoDuration::seconds(30);

        processor.turn_on("L1", later);
        let outcome = processor.turn_off("L1", earlier);

        assert!(!outcome.state.is_on);
        assert_eq!(outcome.state.last_command_at, Some(earlier));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_state() {
        let (processor, channel) = processor();
        channel.set_failing(true);

        processor.dim("L1", DimLevel::new(10).unwrap(), Utc::now());

        let stored = processor.store().get("L1").unwrap();
        assert_eq!(stored.dim_percentage.percent(), 10);
        assert_eq!(channel.sent().len(), 1);
    }

    /// Accepts every message and never resolves its delivery
    #[derive(Default)]
    struct UnackedChannel {
        parked: parking_lot::Mutex<Vec<DeliverySender>>,
    }

    impl MessageChannel for UnackedChannel {
        fn send(&self, _message: OutboundMessage) -> DeliveryHandle {
            let (tx, handle) = DeliveryHandle::pending();
            self.parked.lock().push(tx);
            handle
        }

        fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
            None
        }
    }

    #[tokio::test]
    async fn commands_return_before_broker_acknowledges() {
        let channel = Arc::new(UnackedChannel::default());
        let publisher = TelemetryPublisher::new(
            channel.clone(),
            TopicScheme::default(),
            Duration::from_secs(60),
        );
        let processor = Arc::new(CommandProcessor::new(
            Arc::new(DeviceStateStore::new()),
            publisher,
        ));

        let worker = processor.clone();
        let outcomes = tokio::time::timeout(
            Duration::from_millis(500),
            tokio::task::spawn_blocking(move || {
                let dimmed = worker.dim("L1", DimLevel::new(30).unwrap(), Utc::now());
                let off = worker.turn_off("L1", Utc::now());
                (dimmed, off)
            }),
        )
        .await
        .expect("commands blocked on delivery")
        .unwrap();

        let (dimmed, off) = outcomes;
        // a fresh device is off, so dimming it measures nothing
        assert_eq!(dimmed.telemetry.map(|e| e.lumens), Some(0));
        assert_eq!(off.telemetry.map(|e| e.lumens), Some(0));

        let stored = processor.store().get("L1").unwrap();
        assert!(!stored.is_on);
        assert_eq!(stored.dim_percentage.percent(), 30);
        assert_eq!(channel.parked.lock().len(), 2);
    }

    #[tokio::test]
    async fn apply_dispatches_on_kind() {
        let (processor, _channel) = processor();
        let now = Utc::now();

        processor.apply("L1", &Command::turn_on(now));
        processor.apply("L1", &Command::dim(DimLevel::new(60).unwrap(), now));
        let outcome = processor.apply("L1", &Command::turn_off(now));

        assert!(!outcome.state.is_on);
        assert_eq!(outcome.state.dim_percentage.percent(), 60);
    }
}
