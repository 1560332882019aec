pub mod alert_kafka;

pub use alert_kafka::{AlertKafka, AlertKafkaConfig};
