pub mod consumer;
pub mod producer;

pub use consumer::{create_kafka_consumer, KafkaOffsetStore};
pub use producer::{create_kafka_producer, KafkaContext};
