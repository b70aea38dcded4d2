use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rdkafka::consumer::StreamConsumer;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backfill::HttpBackfillResolver;
use crate::config::Config;
use crate::health::{HealthHandle, HealthRegistry};
use crate::idempotency::IdempotencyGuard;
use crate::kafka::consumer::{run_consumer_loop, ShutdownTimeouts};
use crate::kafka::{create_kafka_consumer, create_kafka_producer, KafkaContext, KafkaOffsetStore};
use crate::metrics_consts::{GUARD_ENTRIES, GUARD_SWEPT};
use crate::pipeline::TickPipeline;
use crate::sink::{KafkaSink, TickSink};
use crate::worker::{PartitionDispatcher, WorkerConfig};

/// Everything the service needs, wired from the config
pub struct AppContext {
    pub config: Config,
    pub health_registry: HealthRegistry,
    pub consumer_liveness: HealthHandle,
    pub consumer: Arc<StreamConsumer<KafkaContext>>,
    pub sink: Arc<dyn TickSink>,
    pub guard: Arc<IdempotencyGuard>,
    pub pipeline: Arc<TickPipeline>,
}

impl AppContext {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let health_registry = HealthRegistry::new("liveness");
        let consumer_liveness = health_registry.register("consumer_loop", Duration::from_secs(30));
        let consumer_kafka_liveness =
            health_registry.register("rdkafka_consumer", Duration::from_secs(30));
        let producer_kafka_liveness =
            health_registry.register("rdkafka_producer", Duration::from_secs(30));

        let producer = create_kafka_producer(&config.kafka, producer_kafka_liveness)
            .await
            .context("failed to create Kafka producer")?;
        let sink: Arc<dyn TickSink> = Arc::new(KafkaSink::new(
            producer,
            config.output_topic.clone(),
            config.dead_letter_topic.clone(),
        ));

        let consumer = create_kafka_consumer(config, consumer_kafka_liveness)
            .context("failed to create Kafka consumer")?;

        let guard = Arc::new(IdempotencyGuard::new(
            config.idempotency_ttl(),
            config.idempotency_max_entries,
        ));

        let mut pipeline = TickPipeline::new(guard.clone(), sink.clone());
        match (&config.backfill_url, config.backfill_enabled) {
            (Some(url), true) => {
                let resolver = HttpBackfillResolver::new(url, config.backfill_deadline())
                    .context("failed to build backfill client")?;
                pipeline = pipeline.with_backfill(Arc::new(resolver));
                info!(url = %url, "price backfill enabled");
            }
            _ => info!("price backfill disabled"),
        }

        info!(
            input_topic = %config.input_topic,
            output_topic = %config.output_topic,
            dead_letter_topic = %config.dead_letter_topic,
            "AppContext initialized"
        );

        Ok(Self {
            config: config.clone(),
            health_registry,
            consumer_liveness,
            consumer: Arc::new(consumer),
            sink,
            guard,
            pipeline: Arc::new(pipeline),
        })
    }

    /// Periodically drop expired ids from the idempotency guard
    pub fn spawn_guard_sweeper(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let guard = self.guard.clone();
        let period = self.config.idempotency_sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        let removed = guard.sweep();
                        metrics::counter!(GUARD_SWEPT).increment(removed as u64);
                        metrics::gauge!(GUARD_ENTRIES).set(guard.len() as f64);
                        debug!(removed, "idempotency sweep finished");
                    }
                }
            }
        })
    }

    /// Run the consumer until shutdown is signalled, then drain and commit.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let dispatcher = PartitionDispatcher::new(
            self.pipeline.clone(),
            Arc::new(KafkaOffsetStore::new(self.consumer.clone())),
            WorkerConfig {
                queue_size: self.config.partition_queue_size,
                retry_backoff: self.config.publish_retry_backoff(),
            },
            shutdown.clone(),
        );

        run_consumer_loop(
            self.consumer.clone(),
            dispatcher,
            self.sink.clone(),
            self.consumer_liveness.clone(),
            shutdown,
            ShutdownTimeouts {
                workers: self.config.shutdown_timeout(),
                producer_flush: self.config.producer_graceful_shutdown(),
            },
        )
        .await
        .context("consumer loop failed")
    }
}
