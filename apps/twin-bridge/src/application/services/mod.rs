//! Application Services
//!
//! The bridge's processing paths, built on the ports only:
//!
//! - [`EventForwarder`]: registry WebSocket events onto the broker
//! - [`RegistryEventConsumer`] + [`ReconciliationWorker`]: lifecycle events into the catalog
//! - [`SampleIngestor`]: feature samples into the time-series store
//! - [`PredictionIngestor`]: ML outputs into predictions and alerts
//! - [`HistoryService`]: read-only queries for the REST layer

mod history;
mod passthrough;
mod pipeline;
mod predictions;
mod reconciler;
mod samples;
mod throughput;

pub use history::{HistoryError, HistoryService};
pub use passthrough::EventForwarder;
pub use pipeline::{ConsumerBinding, Pipeline, PipelineDeps};
pub use predictions::{PredictionIngestor, alert_from, prediction_from};
pub use reconciler::{
    EVENT_BUFFER_CAPACITY, ReconcileOutcome, Reconciler, ReconciliationWorker,
    RegistryEventConsumer,
};
pub use samples::{MlPolicy, SampleIngestor};
pub use throughput::{ProcessedSignal, REPORT_INTERVAL, SIGNAL_CAPACITY, ThroughputMonitor};
