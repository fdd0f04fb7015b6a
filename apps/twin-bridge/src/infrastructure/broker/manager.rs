//! Broker Manager
//!
//! Owns the main producer, the dead-letter producer, and one consumer per
//! handler registration. Handlers are registered before [`BrokerManager::start`];
//! each registration becomes a consumer named `<name>-<topic>` in the shared
//! group, supervised so a panic restarts it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{DLQ_PRODUCER_CLIENT_ID, PRODUCER_CLIENT_ID};
use super::consumer::{HandlerRegistry, KafkaConsumer};
use super::error::BrokerError;
use super::producer::KafkaProducer;
use super::supervisor::supervise;
use crate::application::ports::{EventPublisher, MessageHandler};
use crate::application::services::ThroughputMonitor;
use crate::infrastructure::config::KafkaSettings;

struct Registration {
    name: String,
    topic: String,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct State {
    registrations: Vec<Registration>,
    running: bool,
    tasks: Vec<JoinHandle<()>>,
}

/// Producers, consumers and their lifecycle.
pub struct BrokerManager {
    settings: KafkaSettings,
    producer: Arc<KafkaProducer>,
    dlq_producer: Arc<KafkaProducer>,
    cancel: CancellationToken,
    state: parking_lot::Mutex<State>,
}

impl BrokerManager {
    /// Create both producers. Consumers are created by [`BrokerManager::start`].
    ///
    /// # Errors
    ///
    /// Returns `Client` if either producer cannot be created.
    pub fn new(settings: &KafkaSettings) -> Result<Self, BrokerError> {
        Ok(Self {
            settings: settings.clone(),
            producer: Arc::new(KafkaProducer::new(settings, PRODUCER_CLIENT_ID)?),
            dlq_producer: Arc::new(KafkaProducer::new(settings, DLQ_PRODUCER_CLIENT_ID)?),
            cancel: CancellationToken::new(),
            state: parking_lot::Mutex::new(State::default()),
        })
    }

    /// The main producer.
    #[must_use]
    pub fn producer(&self) -> Arc<KafkaProducer> {
        Arc::clone(&self.producer)
    }

    /// The main producer as a port.
    #[must_use]
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.producer) as Arc<dyn EventPublisher>
    }

    /// Register `handler` for `topic` under consumer `name`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` once consumers have started.
    pub fn register_handler(
        &self,
        name: &str,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.running {
            return Err(BrokerError::AlreadyRunning);
        }
        state.registrations.push(Registration {
            name: name.to_string(),
            topic: topic.to_string(),
            handler,
        });
        tracing::debug!(consumer = name, topic, "Handler registered");
        Ok(())
    }

    /// Whether consumers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start one supervised consumer per registration and the throughput
    /// monitor. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Client` if a consumer cannot be created or subscribed; no
    /// consumer is started in that case.
    pub fn start(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.running {
            return Ok(());
        }

        let (processed, monitor) = ThroughputMonitor::channel();
        let dlq = Arc::clone(&self.dlq_producer) as Arc<dyn EventPublisher>;
        let mut registry = HandlerRegistry::new(dlq).with_processed_signal(processed);
        let mut consumers: Vec<(String, String)> = Vec::new();
        for registration in &state.registrations {
            registry.register(&registration.topic, Arc::clone(&registration.handler));
            let pair = (registration.name.clone(), registration.topic.clone());
            if !consumers.contains(&pair) {
                consumers.push(pair);
            }
        }
        let registry = Arc::new(registry);

        let consumers = consumers
            .iter()
            .map(|(name, topic)| {
                KafkaConsumer::new(&self.settings, name, topic, Arc::clone(&registry)).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for consumer in consumers {
            let cancel = self.cancel.clone();
            state.tasks.push(tokio::spawn(async move {
                let name = consumer.name().to_string();
                let loop_cancel = cancel.clone();
                supervise(&name, cancel, move || {
                    Arc::clone(&consumer).run(loop_cancel.clone())
                })
                .await;
            }));
        }

        let cancel = self.cancel.clone();
        state.tasks.push(tokio::spawn(async move {
            monitor.run(cancel).await;
        }));

        state.running = true;
        tracing::info!(
            consumers = state.tasks.len() - 1,
            group = %self.settings.consumer_group,
            "Broker consumers started"
        );
        Ok(())
    }

    /// Stop consumers, wait for in-flight records, then flush and close
    /// both producers.
    pub async fn stop(&self) {
        self.stop_consumers().await;
        self.close_producers();
        tracing::info!("Broker manager stopped");
    }

    /// Stop consumers and wait for in-flight records. Producers stay open.
    pub async fn stop_consumers(&self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.state.lock().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Consumer task ended abnormally");
            }
        }
        self.state.lock().running = false;
        tracing::info!("Broker consumers stopped");
    }

    /// Flush and close both producers.
    pub fn close_producers(&self) {
        self.producer.close();
        self.dlq_producer.close();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{HandlerError, InboundRecord};

    struct Accept;

    #[async_trait]
    impl MessageHandler for Accept {
        async fn handle(&self, _record: &InboundRecord) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registration_is_refused_while_running() {
        let manager = BrokerManager::new(&KafkaSettings::default()).unwrap();
        manager.start().unwrap();
        assert!(manager.is_running());

        let result = manager.register_handler("late", "time-series", Arc::new(Accept));
        assert!(matches!(result, Err(BrokerError::AlreadyRunning)));

        manager.stop().await;
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn registrations_before_start_are_accepted() {
        let manager = BrokerManager::new(&KafkaSettings::default()).unwrap();
        manager
            .register_handler("timeseries-processor", "time-series", Arc::new(Accept))
            .unwrap();
        manager
            .register_handler("timeseries-processor", "time-series", Arc::new(Accept))
            .unwrap();
        assert_eq!(manager.state.lock().registrations.len(), 2);
        manager.stop().await;
    }
}
