//! Domain Layer - Core twin, registry event and time-series types.
//!
//! Everything in this layer is plain data plus pure functions. No I/O,
//! no async, no knowledge of Kafka, Postgres or WebSockets.

/// Registry events and the broker record envelopes built from them.
pub mod events;

/// Samples, rollups, alerts, predictions and the value classifier.
pub mod timeseries;

/// Catalog entities: twins, twin types and projects.
pub mod twin;
