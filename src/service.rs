//! Streetlight service lifecycle with statum state machine
//!
//! Wires the store, processor, consumer and trigger around one message channel
//! and owns the dispatcher that feeds inbound messages to a bounded worker pool.
//!
//! # State Machine
//!
//! ```text
//! Configured ──start()──► Running ──shutdown()──► Stopped
//! ```
//!
//! # Dispatch
//!
//! ```text
//! channel.take_inbound() ──► dispatcher ──[semaphore: workers]──► task per message ──► CommandConsumer
//! ```
//!
//! Messages for different devices are processed in parallel. Nothing orders
//! messages for the same device beyond what the channel delivers.

use crate::channel::{InboundMessage, MessageChannel};
use crate::command::CommandProcessor;
use crate::config::AppConfig;
use crate::consumer::CommandConsumer;
use crate::device::DeviceStateStore;
use crate::telemetry::TelemetryPublisher;
use crate::trigger::CommandTrigger;
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The channel's inbound stream was already taken by someone else
    #[error("Inbound message stream is unavailable")]
    InboundUnavailable,

    #[error("Invalid service configuration: {0}")]
    Configuration(String),
}

/// Lifecycle states of the streetlight service
#[state]
#[derive(Debug, Clone)]
pub enum ServiceState {
    Configured, // Components wired, nothing consuming yet
    Running,    // Dispatcher consuming inbound commands
    Stopped,    // Dispatcher finished, state still readable
}

#[machine]
pub struct StreetlightService<S: ServiceState> {
    workers: usize,
    channel: Arc<dyn MessageChannel>,
    processor: Arc<CommandProcessor>,
    consumer: CommandConsumer,
    trigger: CommandTrigger,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl<S: ServiceState> StreetlightService<S> {
    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }

    pub fn store(&self) -> &Arc<DeviceStateStore> {
        self.processor.store()
    }

    pub fn trigger(&self) -> &CommandTrigger {
        &self.trigger
    }
}

impl StreetlightService<Configured> {
    /// Builds every component on top of `channel`
    pub fn create(config: &AppConfig, channel: Arc<dyn MessageChannel>) -> Self {
        info!(
            "Configuring streetlight service for {}.{} v{}.{}",
            config.topics.namespace, config.topics.domain, config.topics.major, config.topics.minor
        );

        let store = Arc::new(DeviceStateStore::new());
        let publisher = TelemetryPublisher::new(
            channel.clone(),
            config.topics.clone(),
            config.service.publish_timeout(),
        );
        let processor = Arc::new(CommandProcessor::new(store, publisher));
        let consumer = CommandConsumer::new(config.topics.clone(), processor.clone());
        let trigger =
            CommandTrigger::new(config.topics.clone(), channel.clone(), processor.clone());

        Self::new(
            config.service.workers,
            channel,
            processor,
            consumer,
            trigger,
            CancellationToken::new(), // cancel
            None,                     // dispatcher
        )
    }

    /// Takes the inbound stream and starts dispatching commands
    pub fn start(mut self) -> Result<StreetlightService<Running>, ServiceError> {
        if self.workers == 0 {
            return Err(ServiceError::Configuration(
                "workers must be at least 1".to_string(),
            ));
        }
        let inbound = self
            .channel
            .take_inbound()
            .ok_or(ServiceError::InboundUnavailable)?;

        info!("Starting command dispatcher with {} workers", self.workers);
        let handle = tokio::spawn(dispatch(
            inbound,
            self.consumer.clone(),
            self.workers,
            self.cancel.clone(),
        ));
        self.dispatcher = Some(handle);

        Ok(self.transition())
    }
}

impl StreetlightService<Running> {
    /// Stops consuming, waits for in-flight commands and transitions to Stopped
    pub async fn shutdown(mut self) -> StreetlightService<Stopped> {
        info!("Shutting down streetlight service");
        self.cancel.cancel();

        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                error!("Command dispatcher panicked: {}", e);
            }
        }

        info!("Streetlight service stopped");
        self.transition()
    }
}

impl StreetlightService<Stopped> {}

async fn dispatch(
    mut inbound: mpsc::Receiver<InboundMessage>,
    consumer: CommandConsumer,
    workers: usize,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Dispatcher cancelled");
                break;
            }
            message = inbound.recv() => match message {
                Some(message) => message,
                None => {
                    info!("Inbound message stream closed");
                    break;
                }
            },
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let consumer = consumer.clone();
        tasks.spawn(async move {
            consumer.process(&message);
            drop(permit);
        });

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!("Command worker panicked: {}", e);
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Command worker panicked: {}", e);
        }
    }
}
