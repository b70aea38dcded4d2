//! In-memory stand-ins for the pipeline's collaborators, shared by unit and integration
//! tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_types::{CanonicalTick, DeadLetterRecord, Envelope, RawIngestionEvent, RawMetadata, RawPayload};
use rdkafka::error::KafkaError;

use crate::backfill::{BackfillResolver, LatestTick};
use crate::error::{BackfillError, PipelineError};
use crate::idempotency::IdempotencyGuard;
use crate::pipeline::TickPipeline;
use crate::sink::TickSink;
use crate::worker::OffsetStore;

pub const OCCURRED_AT: i64 = 1_700_000_000_000_000;

/// A raw event for AAPL on NYSE with a JSON-encoded blob. `None` leaves the blob out.
pub fn raw_event(event_id: &str, raw_payload: Option<&str>) -> RawIngestionEvent {
    RawIngestionEvent {
        envelope: Envelope {
            event_id: event_id.to_string(),
            trace_id: format!("trace-{event_id}"),
            schema_version: "1.0".to_string(),
            tenant_id: "tenant-a".to_string(),
            producer: "connector-nyse".to_string(),
            occurred_at: OCCURRED_AT,
            ingested_at: OCCURRED_AT + 500_000,
        },
        payload: RawPayload {
            source_system: "nyse-feed".to_string(),
            market: "NYSE".to_string(),
            symbol: "AAPL".to_string(),
            sequence: 42,
            received_at: OCCURRED_AT + 200_000,
            raw_payload: raw_payload.map(str::to_string),
            encoding: Some("json".to_string()),
            metadata: RawMetadata {
                instrument_id: Some("AAPL.NYSE".to_string()),
                ..Default::default()
            },
        },
    }
}

pub fn raw_event_bytes(event: &RawIngestionEvent) -> Vec<u8> {
    serde_json::to_vec(event).unwrap()
}

/// Collects everything published. Can be told to fail the next N publishes.
#[derive(Default)]
pub struct MemorySink {
    ticks: Mutex<Vec<CanonicalTick>>,
    dead_letters: Mutex<Vec<DeadLetterRecord>>,
    failures_left: AtomicUsize,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn ticks(&self) -> Vec<CanonicalTick> {
        self.ticks.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterRecord> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn take_failure(&self, topic: &str) -> Result<(), PipelineError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PipelineError::publish(topic, &KafkaError::Canceled));
        }
        Ok(())
    }
}

#[async_trait]
impl TickSink for MemorySink {
    async fn publish_tick(&self, tick: &CanonicalTick) -> Result<(), PipelineError> {
        self.take_failure("normalized")?;
        self.ticks.lock().unwrap().push(tick.clone());
        Ok(())
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), PipelineError> {
        self.take_failure("dead_letter")?;
        self.dead_letters.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> Result<(), PipelineError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a `RecordingResolver` answers, in call order. Once the script runs out it answers
/// with a miss.
pub enum ResolverReply {
    Tick(f64),
    Miss,
    Fail,
}

#[derive(Default)]
pub struct RecordingResolver {
    calls: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<ResolverReply>>,
}

impl RecordingResolver {
    pub fn new(replies: impl IntoIterator<Item = ResolverReply>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::default(),
            replies: Mutex::new(replies.into_iter().collect()),
        })
    }

    pub fn returning(price: f64) -> Arc<Self> {
        Self::new([ResolverReply::Tick(price)])
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackfillResolver for RecordingResolver {
    async fn get_latest_tick(
        &self,
        instrument_id: &str,
    ) -> Result<Option<LatestTick>, BackfillError> {
        self.calls.lock().unwrap().push(instrument_id.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ResolverReply::Tick(price)) => Ok(Some(LatestTick {
                price,
                volume: None,
                observed_at: Some(OCCURRED_AT - 1_000_000),
            })),
            Some(ResolverReply::Miss) | None => Ok(None),
            Some(ResolverReply::Fail) => Err(BackfillError::Status {
                instrument_id: instrument_id.to_string(),
                status: 503,
            }),
        }
    }
}

/// Remembers every offset stored, per partition, in order
#[derive(Default)]
pub struct RecordingOffsetStore {
    stored: Mutex<Vec<(String, i32, i64)>>,
}

impl RecordingOffsetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stored(&self) -> Vec<(String, i32, i64)> {
        self.stored.lock().unwrap().clone()
    }

    pub fn stored_for(&self, partition: i32) -> Vec<i64> {
        self.stored()
            .into_iter()
            .filter(|(_, p, _)| *p == partition)
            .map(|(_, _, offset)| offset)
            .collect()
    }
}

impl OffsetStore for RecordingOffsetStore {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<(), KafkaError> {
        self.stored
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}

/// A pipeline over a fresh guard and the given sink, with an optional resolver
pub fn pipeline(
    sink: Arc<MemorySink>,
    resolver: Option<Arc<RecordingResolver>>,
) -> (TickPipeline, Arc<IdempotencyGuard>) {
    let guard = Arc::new(IdempotencyGuard::new(Duration::from_secs(3600), 10_000));
    let mut pipeline = TickPipeline::new(guard.clone(), sink);
    if let Some(resolver) = resolver {
        pipeline = pipeline.with_backfill(resolver);
    }
    (pipeline, guard)
}
