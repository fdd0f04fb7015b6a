//! Broker client errors.

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use crate::application::ports::PublishError;

/// Errors from the Kafka producer, consumers and manager.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The cluster could not be reached after the client's own retries.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// librdkafka rejected a configuration or operation.
    #[error("kafka client error: {0}")]
    Client(#[from] KafkaError),

    /// A value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local producer queue is full.
    #[error("producer queue full")]
    QueueFull,

    /// Handlers cannot be registered once consumers run.
    #[error("cannot register handlers while consumers are running")]
    AlreadyRunning,
}

impl BrokerError {
    /// Classify a produce-time error.
    #[must_use]
    pub fn from_produce(error: KafkaError) -> Self {
        match error {
            KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => Self::QueueFull,
            KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerTransportFailure,
            ) => Self::Unavailable(error.to_string()),
            other => Self::Client(other),
        }
    }
}

impl From<BrokerError> for PublishError {
    fn from(error: BrokerError) -> Self {
        match error {
            BrokerError::QueueFull => Self::QueueFull,
            BrokerError::Serialization(e) => Self::Serialization(e.to_string()),
            other => Self::BrokerUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_is_classified() {
        let err =
            BrokerError::from_produce(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull));
        assert!(matches!(err, BrokerError::QueueFull));
        assert_eq!(PublishError::from(err), PublishError::QueueFull);
    }

    #[test]
    fn timeouts_mean_unavailable() {
        let err = BrokerError::from_produce(KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageTimedOut,
        ));
        assert!(matches!(err, BrokerError::Unavailable(_)));
        assert!(matches!(
            PublishError::from(err),
            PublishError::BrokerUnavailable(_)
        ));
    }
}
