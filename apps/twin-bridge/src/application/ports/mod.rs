//! Port Interfaces
//!
//! Contracts between the bridge services and their adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TwinRepository`], [`ProjectRepository`], [`TwinTypeRepository`]:
//!   relational catalog
//! - [`TimeSeriesStore`]: hypertables for samples, rollups, alerts and
//!   predictions
//! - [`EventPublisher`]: broker producer
//! - [`Notifier`]: browser notification fan-out
//!
//! ## Driver Ports (Inbound)
//!
//! - [`MessageHandler`]: invoked by the broker consumer per record
//! - [`RegistryEventHandler`]: invoked by the registry WebSocket reader

mod catalog;
mod consumer;
mod notifier;
mod publisher;
mod timeseries;

pub use catalog::{ProjectRepository, RepositoryError, TwinRepository, TwinTypeRepository};
pub use consumer::{HandlerError, InboundRecord, MessageHandler, RegistryEventHandler};
pub use notifier::{NoOpNotifier, NotificationType, Notifier};
pub use publisher::{EventPublisher, NoOpPublisher, OutboundRecord, PublishError};
pub use timeseries::{TimeRange, TimeSeriesStore};

#[cfg(test)]
pub use catalog::{MockProjectRepository, MockTwinRepository, MockTwinTypeRepository};
#[cfg(test)]
pub use timeseries::MockTimeSeriesStore;
