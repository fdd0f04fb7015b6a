//! Pipeline Assembly
//!
//! Builds every handler the bridge registers at startup from the ports it
//! depends on. The broker and registry clients never see this type; they
//! only receive the handlers.
//!
//! ```text
//! registry ws ──► EventForwarder ──► registry-events ─┬─► RegistryEventConsumer ─► worker ─► catalog
//!                                └─► time-series ─────┼─► SampleIngestor ─► store, hub, ml-input
//!                                       ml-output ────┴─► PredictionIngestor ─► store, hub
//! ```

use std::sync::Arc;

use crate::application::ports::{
    EventPublisher, MessageHandler, Notifier, ProjectRepository, RegistryEventHandler,
    TimeSeriesStore, TwinRepository, TwinTypeRepository,
};
use crate::domain::events::topics;

use super::passthrough::EventForwarder;
use super::predictions::PredictionIngestor;
use super::reconciler::{Reconciler, ReconciliationWorker};
use super::samples::{MlPolicy, SampleIngestor};

/// Everything the pipeline depends on.
pub struct PipelineDeps {
    /// Twin catalog.
    pub twins: Arc<dyn TwinRepository>,
    /// Project catalog.
    pub projects: Arc<dyn ProjectRepository>,
    /// Twin type catalog.
    pub twin_types: Arc<dyn TwinTypeRepository>,
    /// Time-series store.
    pub store: Arc<dyn TimeSeriesStore>,
    /// Main broker producer.
    pub publisher: Arc<dyn EventPublisher>,
    /// Browser notifications.
    pub notifier: Arc<dyn Notifier>,
    /// Features forwarded to ML.
    pub ml_policy: MlPolicy,
}

/// A consumer handler and where it is registered.
#[derive(Clone)]
pub struct ConsumerBinding {
    /// Consumer name; the broker client suffixes it with the topic.
    pub name: &'static str,
    /// Subscribed topic.
    pub topic: &'static str,
    /// Handler for the topic.
    pub handler: Arc<dyn MessageHandler>,
}

/// Assembled handlers.
pub struct Pipeline {
    forwarder: Arc<EventForwarder>,
    bindings: Vec<ConsumerBinding>,
    worker: Option<ReconciliationWorker>,
}

impl Pipeline {
    /// Build every handler from `deps`.
    #[must_use]
    pub fn new(deps: PipelineDeps) -> Self {
        let reconciler = Reconciler::new(deps.twins, deps.projects, deps.twin_types);
        let (registry_events, worker) =
            ReconciliationWorker::channel(reconciler, Arc::clone(&deps.notifier));

        let samples = SampleIngestor::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.publisher),
            Arc::clone(&deps.notifier),
            deps.ml_policy,
        );
        let predictions = PredictionIngestor::new(deps.store, deps.notifier);

        let bindings = vec![
            ConsumerBinding {
                name: "registry-event-processor",
                topic: topics::REGISTRY_EVENTS,
                handler: Arc::new(registry_events),
            },
            ConsumerBinding {
                name: "timeseries-processor",
                topic: topics::TIME_SERIES,
                handler: Arc::new(samples),
            },
            ConsumerBinding {
                name: "ml-output-processor",
                topic: topics::ML_OUTPUT,
                handler: Arc::new(predictions),
            },
        ];

        Self {
            forwarder: Arc::new(EventForwarder::new(deps.publisher)),
            bindings,
            worker: Some(worker),
        }
    }

    /// Handler for events read from the registry WebSocket.
    #[must_use]
    pub fn registry_handler(&self) -> Arc<dyn RegistryEventHandler> {
        Arc::clone(&self.forwarder) as Arc<dyn RegistryEventHandler>
    }

    /// Consumer handlers, in registration order.
    #[must_use]
    pub fn consumer_bindings(&self) -> &[ConsumerBinding] {
        &self.bindings
    }

    /// Take the reconciliation worker. Returns `None` after the first call.
    pub fn take_worker(&mut self) -> Option<ReconciliationWorker> {
        self.worker.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        MockProjectRepository, MockTimeSeriesStore, MockTwinRepository, MockTwinTypeRepository,
        NoOpNotifier, NoOpPublisher,
    };

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineDeps {
            twins: Arc::new(MockTwinRepository::new()),
            projects: Arc::new(MockProjectRepository::new()),
            twin_types: Arc::new(MockTwinTypeRepository::new()),
            store: Arc::new(MockTimeSeriesStore::new()),
            publisher: Arc::new(NoOpPublisher),
            notifier: Arc::new(NoOpNotifier),
            ml_policy: MlPolicy::all(),
        })
    }

    #[test]
    fn binds_three_consumer_topics_in_order() {
        let pipeline = pipeline();
        let topics: Vec<&str> = pipeline.consumer_bindings().iter().map(|b| b.topic).collect();
        assert_eq!(topics, ["registry-events", "time-series", "ml-output"]);
    }

    #[test]
    fn worker_is_taken_once() {
        let mut pipeline = pipeline();
        assert!(pipeline.take_worker().is_some());
        assert!(pipeline.take_worker().is_none());
    }
}
