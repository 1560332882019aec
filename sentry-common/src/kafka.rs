//! Shared Kafka client configuration, in the style of
//! `digital_muon_common::generate_kafka_client_config`.
use rdkafka::ClientConfig;

/// Builds a base [`ClientConfig`] for the given broker list.
///
/// Stage-specific options (`group.id`, `message.timeout.ms`, ...) are added
/// by the caller on top of this base, the same layering
/// `create_default_consumer` uses.
pub fn client_config(brokers: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    config
}

/// Builds a [`ClientConfig`] for a consumer with the given consumer group.
pub fn consumer_config(brokers: &str, consumer_group: &str) -> ClientConfig {
    let mut config = client_config(brokers);
    config
        .set("group.id", consumer_group)
        .set("enable.partition.eof", "true")
        .set("auto.offset.reset", "latest");
    config
}
