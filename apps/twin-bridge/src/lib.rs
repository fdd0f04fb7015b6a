#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Twin Event Bridge
//!
//! Keeps one WebSocket connection to the twin registry, republishes its
//! change events onto Kafka, consumes them back to reconcile the twin
//! catalog and persist feature samples, ML predictions and alerts in
//! TimescaleDB, and pushes notifications to browser clients.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: registry events, catalog entities, time-series rows and the
//!   value classifier
//! - **Application**: ports and the processing services built on them
//! - **Infrastructure**: Kafka, Postgres, registry clients, notification
//!   hub, health server, configuration and telemetry
//!
//! # Data Flow
//!
//! ```text
//! registry ws ──► registry-events ──► reconciliation worker ──► catalog
//!             └─► time-series ──────► sample ingestor ────────► timeseries_data, hub, ml-input
//!                 ml-output ────────► prediction ingestor ────► ml_prediction_data, alert_data, hub
//! ```
//!
//! Every handler failure is copied to `<topic>.dlq` with `error` and
//! `original_topic` headers; consumption continues.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Plain data and pure functions.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

pub use application::services::{HistoryService, Pipeline, PipelineDeps};
pub use infrastructure::bridge::{Bridge, BridgeError};
pub use infrastructure::config::{Config, ConfigError};
pub use infrastructure::metrics::init_metrics;
