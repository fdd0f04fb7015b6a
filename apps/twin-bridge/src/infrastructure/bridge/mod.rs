//! Bridge Orchestrator
//!
//! Owns the broker manager and the registry WebSocket client and wires the
//! pipeline handlers into both. Neither client holds a reference back to
//! the bridge.
//!
//! # Startup
//!
//! 1. Register the registry event forwarder on the WebSocket client
//! 2. Register every consumer binding on the broker manager and start it
//! 3. Spawn the reconciliation worker
//! 4. Spawn the WebSocket connection loop and subscribe to all things
//!
//! # Shutdown
//!
//! Consumers stop first so no new work arrives, then the worker, then the
//! WebSocket closes with a normal-close frame, then producers flush, then
//! the database pool closes. The whole sequence is bounded by
//! [`SHUTDOWN_TIMEOUT`].

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::services::Pipeline;
use crate::infrastructure::broker::{BrokerError, BrokerManager};
use crate::infrastructure::registry::{HandlerKey, RegistryClientError, RegistryWsClient};

/// Upper bound for the shutdown sequence.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for the first registry connection.
pub const CONNECT_WAIT: Duration = Duration::from_secs(10);

/// Bridge lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// `start` was called twice.
    #[error("bridge already started")]
    AlreadyStarted,

    /// Broker setup failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Default)]
struct Tasks {
    worker: Option<JoinHandle<()>>,
    registry: Option<JoinHandle<()>>,
}

/// Registry ⇄ broker ⇄ store orchestrator.
pub struct Bridge {
    broker: Arc<BrokerManager>,
    registry: Arc<RegistryWsClient>,
    pool: Option<PgPool>,
    pipeline: parking_lot::Mutex<Pipeline>,
    worker_cancel: CancellationToken,
    connect_wait: Duration,
    tasks: tokio::sync::Mutex<Tasks>,
}

impl Bridge {
    /// Assemble the bridge. `pool` is closed last on shutdown.
    #[must_use]
    pub fn new(
        broker: Arc<BrokerManager>,
        registry: Arc<RegistryWsClient>,
        pipeline: Pipeline,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            broker,
            registry,
            pool,
            pipeline: parking_lot::Mutex::new(pipeline),
            worker_cancel: CancellationToken::new(),
            connect_wait: CONNECT_WAIT,
            tasks: tokio::sync::Mutex::new(Tasks::default()),
        }
    }

    /// Override how long [`Bridge::start`] waits for the registry.
    #[must_use]
    pub const fn with_connect_wait(mut self, wait: Duration) -> Self {
        self.connect_wait = wait;
        self
    }

    /// The registry WebSocket client.
    #[must_use]
    pub fn registry(&self) -> Arc<RegistryWsClient> {
        Arc::clone(&self.registry)
    }

    /// The broker manager.
    #[must_use]
    pub fn broker(&self) -> Arc<BrokerManager> {
        Arc::clone(&self.broker)
    }

    /// Start consumers, the worker and the registry connection.
    ///
    /// Does not fail if the registry is unreachable: the connection loop
    /// keeps retrying and replays the subscription once connected.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyStarted` on a second call, `Broker` if a consumer
    /// cannot be created.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut tasks = self.tasks.lock().await;

        let (registry_handler, bindings, worker) = {
            let mut pipeline = self.pipeline.lock();
            let worker = pipeline.take_worker().ok_or(BridgeError::AlreadyStarted)?;
            (
                pipeline.registry_handler(),
                pipeline.consumer_bindings().to_vec(),
                worker,
            )
        };

        self.registry
            .register_handler(HandlerKey::AnyThing, registry_handler);

        for binding in bindings {
            self.broker
                .register_handler(binding.name, binding.topic, binding.handler)?;
        }
        self.broker.start()?;

        let cancel = self.worker_cancel.clone();
        tasks.worker = Some(tokio::spawn(worker.run(cancel)));

        tasks.registry = Some(tokio::spawn(Arc::clone(&self.registry).run_supervised()));
        drop(tasks);

        if self.registry.wait_until_connected(self.connect_wait).await {
            if let Err(e) = self.registry.subscribe_to_things(Vec::new(), None).await {
                tracing::warn!(error = %e, "Failed to subscribe to registry events");
            }
        } else {
            // Remembered and sent by the connection loop once it connects.
            match self.registry.subscribe_to_things(Vec::new(), None).await {
                Ok(()) | Err(RegistryClientError::NotConnected) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to subscribe to registry events"),
            }
            tracing::warn!(
                wait_ms = self.connect_wait.as_millis() as u64,
                "Registry not connected yet, subscription deferred"
            );
        }

        tracing::info!("Bridge started");
        Ok(())
    }

    /// Run the shutdown sequence under [`SHUTDOWN_TIMEOUT`]. Exceeding the
    /// deadline is logged, not returned.
    pub async fn shutdown(&self) {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.shutdown_inner())
            .await
            .is_err()
        {
            tracing::error!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Bridge shutdown exceeded deadline"
            );
        }
    }

    async fn shutdown_inner(&self) {
        tracing::info!("Bridge shutting down");

        self.broker.stop_consumers().await;

        let mut tasks = self.tasks.lock().await;
        self.worker_cancel.cancel();
        if let Some(worker) = tasks.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Reconciliation worker ended abnormally");
            }
        }

        self.registry.disconnect().await;
        if let Some(registry) = tasks.registry.take() {
            if let Err(e) = registry.await {
                tracing::warn!(error = %e, "Registry task ended abnormally");
            }
        }
        drop(tasks);

        let broker = Arc::clone(&self.broker);
        if let Err(e) = tokio::task::spawn_blocking(move || broker.close_producers()).await {
            tracing::warn!(error = %e, "Producer flush ended abnormally");
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
            tracing::info!("Database pool closed");
        }

        tracing::info!("Bridge stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{NoOpNotifier, NoOpPublisher};
    use crate::application::services::{MlPolicy, PipelineDeps};
    use crate::infrastructure::config::{DittoSettings, KafkaSettings};
    use crate::infrastructure::persistence::{InMemoryCatalog, InMemoryTimeSeriesStore};
    use crate::infrastructure::registry::RegistryWsConfig;

    fn bridge() -> Bridge {
        let catalog = Arc::new(InMemoryCatalog::new());
        let pipeline = Pipeline::new(PipelineDeps {
            twins: catalog.clone(),
            projects: catalog.clone(),
            twin_types: catalog,
            store: Arc::new(InMemoryTimeSeriesStore::new()),
            publisher: Arc::new(NoOpPublisher),
            notifier: Arc::new(NoOpNotifier),
            ml_policy: MlPolicy::default(),
        });

        let mut config = RegistryWsConfig::from_settings(&DittoSettings::default()).unwrap();
        config.url = "ws://127.0.0.1:1/ws/2".to_string();
        let registry = Arc::new(RegistryWsClient::new(config, CancellationToken::new()));
        let broker = Arc::new(BrokerManager::new(&KafkaSettings::default()).unwrap());

        Bridge::new(broker, registry, pipeline, None)
            .with_connect_wait(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn start_twice_is_refused() {
        let bridge = bridge();
        bridge.start().await.unwrap();
        assert!(bridge.broker().is_running());
        assert_eq!(bridge.registry().subscriptions().len(), 1);

        assert!(matches!(bridge.start().await, Err(BridgeError::AlreadyStarted)));

        bridge.shutdown().await;
        assert!(!bridge.broker().is_running());
        assert!(!bridge.registry().is_connected());
    }
}
