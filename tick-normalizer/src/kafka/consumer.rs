use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::health::{ComponentStatus, HealthHandle};
use crate::kafka::producer::{base_client_config, KafkaContext};
use crate::metrics_consts::{KAFKA_CONSUMER_ERRORS, MESSAGES_CONSUMED};
use crate::sink::TickSink;
use crate::worker::{InputMessage, OffsetStore, PartitionDispatcher};

/// Create the input consumer and subscribe it to the input topic.
///
/// Auto-commit stays on, but offsets are only *stored* by the partition workers once a
/// message reached its terminal state, so a commit never covers unfinished work.
pub fn create_kafka_consumer(
    config: &Config,
    liveness: HealthHandle,
) -> Result<StreamConsumer<KafkaContext>, KafkaError> {
    let mut client_config = base_client_config(&config.kafka);
    client_config
        .set("group.id", &config.kafka_consumer_group)
        .set("auto.offset.reset", &config.kafka_consumer_offset_reset)
        .set("enable.auto.commit", "true")
        .set(
            "auto.commit.interval.ms",
            config.kafka_consumer_auto_commit_interval_ms.to_string(),
        )
        .set("enable.auto.offset.store", "false");

    debug!("rdkafka consumer configuration: {:?}", client_config);
    let consumer: StreamConsumer<KafkaContext> =
        client_config.create_with_context(KafkaContext::from(liveness))?;
    consumer.subscribe(&[config.input_topic.as_str()])?;

    Ok(consumer)
}

/// Stores offsets on the shared input consumer
#[derive(Clone)]
pub struct KafkaOffsetStore {
    consumer: Arc<StreamConsumer<KafkaContext>>,
}

impl KafkaOffsetStore {
    pub fn new(consumer: Arc<StreamConsumer<KafkaContext>>) -> Self {
        Self { consumer }
    }
}

impl OffsetStore for KafkaOffsetStore {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        self.consumer.store_offset(topic, partition, offset)
    }
}

const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Pull from the input topic and hand each message to its partition worker until shutdown
/// is signalled or the consumer hits a fatal error. Then the workers are drained, the
/// producer flushed, stored offsets committed and the consumer unsubscribed, in that order.
pub async fn run_consumer_loop(
    consumer: Arc<StreamConsumer<KafkaContext>>,
    mut dispatcher: PartitionDispatcher,
    sink: Arc<dyn TickSink>,
    liveness: HealthHandle,
    mut shutdown: watch::Receiver<bool>,
    timeouts: ShutdownTimeouts,
) -> Result<(), KafkaError> {
    let mut kafka_error_count = 0_u64;
    let mut health_interval = tokio::time::interval(HEALTH_REPORT_INTERVAL);
    let mut fatal = None;

    info!("starting consumer loop");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = health_interval.tick() => liveness.report_healthy(),
            received = consumer.recv() => match received.map(|m| InputMessage::from(&m)) {
                Ok(message) => {
                    kafka_error_count = 0;
                    metrics::counter!(MESSAGES_CONSUMED).increment(1);
                    // Blocks while the partition queue is full. On shutdown the worker
                    // drops its queue, which releases us.
                    dispatcher.dispatch(message).await;
                }
                Err(e) => {
                    kafka_error_count += 1;
                    if let Some(e) = handle_kafka_error(e, kafka_error_count).await {
                        liveness.report_status(ComponentStatus::Unhealthy);
                        fatal = Some(e);
                        break;
                    }
                }
            },
        }
    }

    info!("graceful shutdown: waiting for partition workers");
    if !dispatcher.shutdown(timeouts.workers).await {
        warn!("graceful shutdown: some partition workers were still busy");
    }

    info!("graceful shutdown: flushing producer");
    if let Err(e) = sink.flush(timeouts.producer_flush) {
        warn!("failed to flush producer on graceful shutdown: {e}");
    }

    info!("graceful shutdown: committing stored offsets");
    if let Err(e) = consumer.commit_consumer_state(CommitMode::Sync) {
        // Nothing stored yet is reported as an error too, so this is not fatal
        warn!("failed to commit offsets on graceful shutdown: {e}");
    }

    consumer.unsubscribe();
    info!("graceful shutdown: completed");

    match fatal {
        Some(KafkaError::Canceled) | None => Ok(()),
        Some(e) => Err(e),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownTimeouts {
    pub workers: Duration,
    pub producer_flush: Duration,
}

// Returns the error if the consumer can't continue
async fn handle_kafka_error(e: KafkaError, current_count: u64) -> Option<KafkaError> {
    match &e {
        KafkaError::MessageConsumption(code) => {
            match code {
                RDKafkaErrorCode::PartitionEOF => {
                    metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "partition_eof")
                        .increment(1);
                }
                RDKafkaErrorCode::OperationTimedOut => {
                    metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "op_timed_out")
                        .increment(1);
                }
                RDKafkaErrorCode::OffsetOutOfRange => {
                    // "auto.offset.reset" seeks to head or tail with the broker
                    warn!("offset out of range, resetting");
                    metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "offset_out_of_range")
                        .increment(1);
                    sleep(Duration::from_millis(500)).await;
                }
                _ => {
                    warn!("Kafka consumer error: {code:?}");
                    metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "consumer").increment(1);
                    sleep(Duration::from_millis(100 * current_count.min(10))).await;
                }
            }
            None
        }

        KafkaError::MessageConsumptionFatal(code) => {
            error!("fatal Kafka consumer error: {code:?}");
            metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "fatal").increment(1);
            Some(e)
        }

        KafkaError::Global(RDKafkaErrorCode::Authentication) => {
            error!("Kafka authentication failed");
            metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "authentication").increment(1);
            Some(e)
        }

        KafkaError::Global(code) => {
            warn!("global Kafka error: {code:?}, waiting for reconnect");
            metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "global").increment(1);
            sleep(Duration::from_millis(500 * current_count.min(6))).await;
            None
        }

        KafkaError::Canceled => {
            info!("consumer canceled");
            Some(e)
        }

        _ => {
            error!("unexpected Kafka error: {e:?}");
            metrics::counter!(KAFKA_CONSUMER_ERRORS, "error" => "unexpected").increment(1);
            sleep(Duration::from_millis(100 * current_count.min(10))).await;
            None
        }
    }
}
