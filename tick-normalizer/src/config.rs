use std::time::Duration;

use envconfig::Envconfig;
use thiserror::Error;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "snappy")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "10")]
    pub kafka_producer_graceful_shutdown_secs: u64,
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "tick-normalizer")]
    pub kafka_consumer_group: String,

    // We default to "earliest" so a new consumer group replays what the connectors already wrote
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Offsets are only *stored* once a message reaches a terminal state; auto-commit then
    // periodically commits whatever was stored.
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,

    #[envconfig(default = "market_ticks_raw")]
    pub input_topic: String,

    #[envconfig(default = "market_ticks_normalized")]
    pub output_topic: String,

    #[envconfig(default = "market_ticks_dead_letter")]
    pub dead_letter_topic: String,

    // Backfill of missing prices from the historical store
    #[envconfig(default = "true")]
    pub backfill_enabled: bool,

    pub backfill_url: Option<String>,

    // Passed through to the historical store client, never enforced by the pipeline itself
    pub backfill_deadline_ms: Option<u64>,

    // Idempotency guard
    #[envconfig(default = "3600")]
    pub idempotency_ttl_seconds: u64,

    #[envconfig(default = "1000000")]
    pub idempotency_max_entries: usize,

    #[envconfig(default = "60")]
    pub idempotency_sweep_interval_secs: u64,

    // Partition workers
    #[envconfig(default = "1000")]
    pub partition_queue_size: usize,

    #[envconfig(default = "1000")]
    pub publish_retry_backoff_ms: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(default = "0.0.0.0")]
    pub bind_host: String,

    #[envconfig(default = "3302")]
    pub bind_port: u16,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("BACKFILL_ENABLED is set but BACKFILL_URL is not")]
    MissingBackfillUrl,
    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
    #[error("{topic} is used for both {first} and {second}")]
    TopicCollision {
        topic: String,
        first: &'static str,
        second: &'static str,
    },
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backfill_enabled && self.backfill_url.is_none() {
            return Err(ConfigError::MissingBackfillUrl);
        }
        if self.idempotency_ttl_seconds == 0 {
            return Err(ConfigError::MustBePositive("IDEMPOTENCY_TTL_SECONDS"));
        }
        if self.idempotency_max_entries == 0 {
            return Err(ConfigError::MustBePositive("IDEMPOTENCY_MAX_ENTRIES"));
        }
        if self.partition_queue_size == 0 {
            return Err(ConfigError::MustBePositive("PARTITION_QUEUE_SIZE"));
        }
        if self.idempotency_sweep_interval_secs == 0 {
            return Err(ConfigError::MustBePositive("IDEMPOTENCY_SWEEP_INTERVAL_SECS"));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::MustBePositive("SHUTDOWN_TIMEOUT_SECS"));
        }

        let topics = [
            ("INPUT_TOPIC", &self.input_topic),
            ("OUTPUT_TOPIC", &self.output_topic),
            ("DEAD_LETTER_TOPIC", &self.dead_letter_topic),
        ];
        for (i, &(first, a)) in topics.iter().enumerate() {
            for &(second, b) in topics.iter().skip(i + 1) {
                if a == b {
                    return Err(ConfigError::TopicCollision {
                        topic: a.to_string(),
                        first,
                        second,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn idempotency_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idempotency_sweep_interval_secs)
    }

    pub fn backfill_deadline(&self) -> Option<Duration> {
        self.backfill_deadline_ms.map(Duration::from_millis)
    }

    pub fn publish_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_retry_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn producer_graceful_shutdown(&self) -> Duration {
        Duration::from_secs(self.kafka.kafka_producer_graceful_shutdown_secs)
    }
}
