// ==== Consumer ====
/// Counter for messages read from the input topic
pub const MESSAGES_CONSUMED: &str = "tick_normalizer_messages_consumed_total";

/// Counter for errors returned by the Kafka consumer
pub const KAFKA_CONSUMER_ERRORS: &str = "tick_normalizer_kafka_consumer_errors_total";

/// Counter for failures to store an offset after a terminal state
pub const OFFSET_STORE_ERRORS: &str = "tick_normalizer_offset_store_errors_total";

/// Gauge for the number of live partition workers
pub const PARTITION_WORKERS: &str = "tick_normalizer_partition_workers";

// ==== Pipeline ====
/// Counter for terminal states, labelled with `outcome`
pub const PIPELINE_OUTCOMES: &str = "tick_normalizer_outcomes_total";

/// Counter for dead letters, labelled with `error_code` and `issue`
pub const DEAD_LETTERS: &str = "tick_normalizer_dead_letters_total";

/// Counter for backfill lookups, labelled with `result` (hit, miss, error)
pub const BACKFILL_LOOKUPS: &str = "tick_normalizer_backfill_lookups_total";

/// Histogram for backfill lookup latency
pub const BACKFILL_DURATION: &str = "tick_normalizer_backfill_duration_seconds";

/// Histogram for end-to-end processing time of one message
pub const PROCESSING_DURATION: &str = "tick_normalizer_processing_duration_seconds";

/// Counter for publish failures, labelled with `output`
pub const PUBLISH_ERRORS: &str = "tick_normalizer_publish_errors_total";

// ==== Idempotency guard ====
/// Gauge for the number of ids held by the guard
pub const GUARD_ENTRIES: &str = "tick_normalizer_idempotency_entries";

/// Counter for expired ids removed by the periodic sweep
pub const GUARD_SWEPT: &str = "tick_normalizer_idempotency_swept_total";
