//! Shared librdkafka client configuration.

use rdkafka::config::ClientConfig;

use crate::infrastructure::config::KafkaSettings;

/// Client id of the main producer.
pub const PRODUCER_CLIENT_ID: &str = "digital-egiz-producer";

/// Client id of the dead-letter producer.
pub const DLQ_PRODUCER_CLIENT_ID: &str = "digital-egiz-dlq-producer";

/// Auto-commit interval for consumers.
pub const AUTO_COMMIT_INTERVAL_MS: u32 = 5000;

/// Bootstrap servers plus SASL_SSL/PLAIN when security is enabled.
#[must_use]
pub fn base_config(settings: &KafkaSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &settings.brokers);

    if settings.security_enable {
        config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", &settings.security_user)
            .set("sasl.password", &settings.security_pass);
    }
    config
}

/// Producer configuration with acks-all delivery.
#[must_use]
pub fn producer_config(settings: &KafkaSettings, client_id: &str) -> ClientConfig {
    let mut config = base_config(settings);
    config
        .set("client.id", client_id)
        .set("acks", "all")
        .set("message.timeout.ms", "30000")
        .set("retries", "5")
        .set("retry.backoff.ms", "100");
    config
}

/// Consumer configuration for the shared group.
#[must_use]
pub fn consumer_config(settings: &KafkaSettings, client_id: &str) -> ClientConfig {
    let mut config = base_config(settings);
    config
        .set("client.id", client_id)
        .set("group.id", &settings.consumer_group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", AUTO_COMMIT_INTERVAL_MS.to_string())
        .set("session.timeout.ms", "10000");
    config
}
