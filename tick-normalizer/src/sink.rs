use std::time::Duration;

use async_trait::async_trait;
use common_types::{CanonicalTick, DeadLetterRecord};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::Serialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::kafka::KafkaContext;

/// The two outputs of the pipeline. A publish only returns once the record is durably
/// accepted, since the caller stores the input offset right after.
#[async_trait]
pub trait TickSink: Send + Sync {
    async fn publish_tick(&self, tick: &CanonicalTick) -> Result<(), PipelineError>;

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), PipelineError>;

    /// Wait for anything still queued to be delivered
    fn flush(&self, timeout: Duration) -> Result<(), PipelineError>;
}

pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    output_topic: String,
    dead_letter_topic: String,
}

impl KafkaSink {
    pub fn new(
        producer: FutureProducer<KafkaContext>,
        output_topic: String,
        dead_letter_topic: String,
    ) -> Self {
        Self {
            producer,
            output_topic,
            dead_letter_topic,
        }
    }

    async fn send_keyed<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        item: &T,
    ) -> Result<(), PipelineError> {
        let payload = serde_json::to_string(item)?;
        let record = FutureRecord::to(topic).key(key).payload(&payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| PipelineError::publish(topic, &e))?;

        match delivery.await {
            Ok(Ok(_)) => {
                debug!(topic, key, "published");
                Ok(())
            }
            Ok(Err((e, _))) => Err(PipelineError::publish(topic, &e)),
            // The producer dropped the message without reporting, e.g. during shutdown
            Err(_) => Err(PipelineError::publish(topic, &KafkaError::Canceled)),
        }
    }
}

#[async_trait]
impl TickSink for KafkaSink {
    async fn publish_tick(&self, tick: &CanonicalTick) -> Result<(), PipelineError> {
        self.send_keyed(&self.output_topic, tick.key(), tick).await
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), PipelineError> {
        self.send_keyed(&self.dead_letter_topic, record.key(), record)
            .await
    }

    fn flush(&self, timeout: Duration) -> Result<(), PipelineError> {
        self.producer
            .flush(timeout)
            .map_err(PipelineError::Flush)
    }
}
