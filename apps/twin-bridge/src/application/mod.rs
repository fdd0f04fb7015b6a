//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the bridge needs from the outside world (catalog and
//! time-series repositories, a broker publisher, a notification sink) and
//! what the outside world drives it through (broker message handlers,
//! registry event handlers). Services implement the processing paths on
//! top of those ports only.

/// Port interfaces implemented by infrastructure adapters.
pub mod ports;

/// Bridge processing paths and read-only history queries.
pub mod services;
