//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing around them.

/// Registry, broker and store orchestration.
pub mod bridge;

/// Kafka producers, consumers and dead-letter routing.
pub mod broker;

/// Layered configuration.
pub mod config;

/// Health check, metrics and notification HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Browser notification hub.
pub mod notifications;

/// Postgres/TimescaleDB and in-memory repositories.
pub mod persistence;

/// Twin registry WebSocket and HTTP clients.
pub mod registry;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
