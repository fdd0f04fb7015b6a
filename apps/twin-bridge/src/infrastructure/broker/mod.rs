//! Broker Adapter
//!
//! Kafka-compatible producers and consumers built on `rdkafka`.
//!
//! - [`KafkaProducer`]: acks-all producer implementing `EventPublisher`
//! - [`HandlerRegistry`]: per-topic dispatch with dead-lettering
//! - [`BrokerManager`]: lifecycle of both producers and every consumer

mod client;
mod consumer;
mod error;
mod manager;
mod producer;
mod recording;
mod supervisor;

pub use client::{
    AUTO_COMMIT_INTERVAL_MS, DLQ_PRODUCER_CLIENT_ID, PRODUCER_CLIENT_ID, base_config,
    consumer_config, producer_config,
};
pub use consumer::{
    DispatchOutcome, ERROR_HEADER, HandlerRegistry, KafkaConsumer, ORIGINAL_TOPIC_HEADER,
};
pub use error::BrokerError;
pub use manager::BrokerManager;
pub use producer::{CLOSE_FLUSH_TIMEOUT, DeliveryReport, KafkaProducer};
pub use recording::RecordingPublisher;
pub use supervisor::{RESTART_DELAY, supervise};
