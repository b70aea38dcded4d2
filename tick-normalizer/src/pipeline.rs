use std::sync::Arc;
use std::time::Instant;

use common_types::{
    issues, now_micros, to_datetime, CanonicalTick, DeadLetterRecord, Envelope, RawIngestionEvent,
    SourceCoordinates,
};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backfill::BackfillResolver;
use crate::dead_letter::{self, FailureContext};
use crate::error::{ContractError, PipelineError};
use crate::idempotency::IdempotencyGuard;
use crate::metrics_consts::{
    BACKFILL_DURATION, BACKFILL_LOOKUPS, DEAD_LETTERS, PIPELINE_OUTCOMES, PROCESSING_DURATION,
    PUBLISH_ERRORS,
};
use crate::normalizer::normalize;
use crate::sink::TickSink;
use crate::validation::{self, ParsedRecord};

/// The states a message moves through. Only `EmitNormalized`, `EmitDlq` and
/// `DuplicateDropped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Parsing,
    SchemaInvalid,
    FieldCheck,
    ContractViolation,
    BackfillLookup,
    Ready,
    FallbackApplied,
    DedupCheck,
    EmitNormalized,
    EmitDlq,
    DuplicateDropped,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Received => "received",
            ProcessingState::Parsing => "parsing",
            ProcessingState::SchemaInvalid => "schema_invalid",
            ProcessingState::FieldCheck => "field_check",
            ProcessingState::ContractViolation => "contract_violation",
            ProcessingState::BackfillLookup => "backfill_lookup",
            ProcessingState::Ready => "ready",
            ProcessingState::FallbackApplied => "fallback_applied",
            ProcessingState::DedupCheck => "dedup_check",
            ProcessingState::EmitNormalized => "emit_normalized",
            ProcessingState::EmitDlq => "emit_dlq",
            ProcessingState::DuplicateDropped => "duplicate_dropped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::EmitNormalized
                | ProcessingState::EmitDlq
                | ProcessingState::DuplicateDropped
        )
    }
}

/// What a message produced. Exactly one of: a canonical tick, a dead letter, nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Normalized(CanonicalTick),
    DeadLettered(DeadLetterRecord),
    Duplicate,
}

impl Outcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            Outcome::Normalized(_) => ProcessingState::EmitNormalized,
            Outcome::DeadLettered(_) => ProcessingState::EmitDlq,
            Outcome::Duplicate => ProcessingState::DuplicateDropped,
        }
    }
}

// Used to attribute messages that are not a valid event
#[derive(Deserialize)]
struct EnvelopeProbe {
    envelope: Envelope,
}

/// Drives one raw event through validation, backfill and normalization to exactly one
/// output. Holds no per-message state, so a single instance is shared by every
/// partition worker.
pub struct TickPipeline {
    guard: Arc<IdempotencyGuard>,
    sink: Arc<dyn TickSink>,
    backfill: Option<Arc<dyn BackfillResolver>>,
}

impl TickPipeline {
    /// A pipeline without backfill: events missing a price are dead-lettered.
    pub fn new(guard: Arc<IdempotencyGuard>, sink: Arc<dyn TickSink>) -> Self {
        Self {
            guard,
            sink,
            backfill: None,
        }
    }

    pub fn with_backfill(mut self, resolver: Arc<dyn BackfillResolver>) -> Self {
        self.backfill = Some(resolver);
        self
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Process one decoded event.
    ///
    /// An `Err` means the output could not be published. The message is then not finished:
    /// the guard entry is rolled back and the caller must retry it.
    pub async fn process(&self, event: &RawIngestionEvent) -> Result<Outcome, PipelineError> {
        self.process_with_source(event, None).await
    }

    /// Decode a message from the input topic and process it. A message that is not an
    /// event at all is dead-lettered with whatever identity can be recovered from it.
    pub async fn process_payload(
        &self,
        payload: &[u8],
        source: SourceCoordinates,
    ) -> Result<Outcome, PipelineError> {
        match serde_json::from_slice::<RawIngestionEvent>(payload) {
            Ok(event) => self.process_with_source(&event, Some(source)).await,
            Err(e) => {
                let event_id = RawIngestionEvent::probe_event_id(payload)
                    .unwrap_or_else(|| FailureContext::fallback_event_id(&source));
                let envelope = serde_json::from_slice::<EnvelopeProbe>(payload)
                    .ok()
                    .map(|probe| probe.envelope);

                let start = Instant::now();
                if self.guard.seen(&event_id) {
                    return Ok(self.finish(&event_id, Outcome::Duplicate, start));
                }

                let error = ContractError::schema(format!("message is not a raw event: {e}"));
                let context = FailureContext {
                    event_id: event_id.clone(),
                    envelope,
                    retry_count: 0,
                    source: Some(source),
                };
                let outcome = self.emit_dead_letter(&error, context).await?;
                Ok(self.finish(&event_id, outcome, start))
            }
        }
    }

    async fn process_with_source(
        &self,
        event: &RawIngestionEvent,
        source: Option<SourceCoordinates>,
    ) -> Result<Outcome, PipelineError> {
        let start = Instant::now();
        let event_id = event.event_id();
        trace!(event_id, state = ProcessingState::Received.as_str());

        if self.guard.seen(event_id) {
            return Ok(self.finish(event_id, Outcome::Duplicate, start));
        }

        let outcome = match self.resolve(event).await {
            Ok((record, backfilled)) => {
                let tick = normalize(record, event, backfilled, now_micros())?;
                self.emit_tick(tick).await?
            }
            Err(error) => {
                let context = FailureContext {
                    event_id: event_id.to_string(),
                    envelope: Some(event.envelope.clone()),
                    retry_count: event.payload.metadata.retry_count,
                    source,
                };
                self.emit_dead_letter(&error, context).await?
            }
        };

        Ok(self.finish(event_id, outcome, start))
    }

    /// Validate the event and make sure it has a price. Returns the record and whether the
    /// price was backfilled.
    async fn resolve(
        &self,
        event: &RawIngestionEvent,
    ) -> Result<(ParsedRecord, bool), ContractError> {
        let event_id = event.event_id();
        trace!(event_id, state = ProcessingState::Parsing.as_str());

        let mut record = validation::validate(event).inspect_err(|e| {
            let state = match e {
                ContractError::Schema { .. } => ProcessingState::SchemaInvalid,
                ContractError::Violation { .. } => ProcessingState::ContractViolation,
            };
            trace!(event_id, state = state.as_str(), "validation failed");
        })?;
        trace!(event_id, state = ProcessingState::FieldCheck.as_str());

        if record.price.is_some() {
            trace!(event_id, state = ProcessingState::Ready.as_str());
            return Ok((record, false));
        }

        let Some(resolver) = &self.backfill else {
            return Err(ContractError::violation(
                issues::MISSING_PRICE,
                "price is absent and backfill is disabled",
            ));
        };

        trace!(event_id, state = ProcessingState::BackfillLookup.as_str());
        let lookup_start = Instant::now();
        let result = resolver.get_latest_tick(&record.instrument_id).await;
        metrics::histogram!(BACKFILL_DURATION).record(lookup_start.elapsed().as_secs_f64());

        match result {
            Ok(Some(latest)) => match latest.usable_price() {
                Some(price) => {
                    metrics::counter!(BACKFILL_LOOKUPS, "result" => "hit").increment(1);
                    trace!(event_id, state = ProcessingState::FallbackApplied.as_str());
                    record.price = Some(price);
                    Ok((record, true))
                }
                None => {
                    metrics::counter!(BACKFILL_LOOKUPS, "result" => "miss").increment(1);
                    Err(ContractError::violation(
                        issues::PRICE_BACKFILL_MISS,
                        format!(
                            "latest price {} for {} is not usable",
                            latest.price, record.instrument_id
                        ),
                    ))
                }
            },
            Ok(None) => {
                metrics::counter!(BACKFILL_LOOKUPS, "result" => "miss").increment(1);
                Err(ContractError::violation(
                    issues::PRICE_BACKFILL_MISS,
                    format!("no latest tick for {}", record.instrument_id),
                ))
            }
            Err(e) => {
                metrics::counter!(BACKFILL_LOOKUPS, "result" => "error").increment(1);
                warn!(
                    event_id,
                    instrument_id = %record.instrument_id,
                    "backfill lookup failed: {e}"
                );
                Err(ContractError::violation(
                    issues::PRICE_BACKFILL_FAILED,
                    e.to_string(),
                ))
            }
        }
    }

    async fn emit_tick(&self, tick: CanonicalTick) -> Result<Outcome, PipelineError> {
        let event_id = tick.envelope.event_id.as_str();
        trace!(event_id, state = ProcessingState::DedupCheck.as_str());

        // Another delivery of this id may have committed while we were working on it
        if !self.guard.try_mark(event_id) {
            return Ok(Outcome::Duplicate);
        }

        if let Err(e) = self.sink.publish_tick(&tick).await {
            self.guard.forget(event_id);
            metrics::counter!(PUBLISH_ERRORS, "output" => "normalized").increment(1);
            return Err(e);
        }

        Ok(Outcome::Normalized(tick))
    }

    async fn emit_dead_letter(
        &self,
        error: &ContractError,
        context: FailureContext,
    ) -> Result<Outcome, PipelineError> {
        let event_id = context.event_id.clone();
        trace!(event_id = %event_id, state = ProcessingState::DedupCheck.as_str());

        // Dead letters are committed too, so a redelivered bad event is not reported twice
        if !self.guard.try_mark(&event_id) {
            return Ok(Outcome::Duplicate);
        }

        let record = dead_letter::route(error, context, now_micros());
        if let Err(e) = self.sink.publish_dead_letter(&record).await {
            self.guard.forget(&event_id);
            metrics::counter!(PUBLISH_ERRORS, "output" => "dead_letter").increment(1);
            return Err(e);
        }

        metrics::counter!(
            DEAD_LETTERS,
            "error_code" => record.error_code.as_str(),
            "issue" => error.issue()
        )
        .increment(1);
        warn!(
            event_id = %event_id,
            error_code = %record.error_code,
            issue = error.issue(),
            "dead-lettered event: {}",
            error.detail()
        );

        Ok(Outcome::DeadLettered(record))
    }

    fn finish(&self, event_id: &str, outcome: Outcome, start: Instant) -> Outcome {
        let state = outcome.state();
        metrics::counter!(PIPELINE_OUTCOMES, "outcome" => state.as_str()).increment(1);
        metrics::histogram!(PROCESSING_DURATION).record(start.elapsed().as_secs_f64());

        match &outcome {
            Outcome::Duplicate => debug!(event_id, "dropped duplicate event"),
            Outcome::Normalized(tick) => debug!(
                event_id,
                instrument_id = %tick.payload.instrument_id,
                occurred_at = ?to_datetime(tick.envelope.occurred_at),
                status = ?tick.payload.quality.status,
                "normalized event"
            ),
            Outcome::DeadLettered(_) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = [
            ProcessingState::Received,
            ProcessingState::Parsing,
            ProcessingState::SchemaInvalid,
            ProcessingState::FieldCheck,
            ProcessingState::ContractViolation,
            ProcessingState::BackfillLookup,
            ProcessingState::Ready,
            ProcessingState::FallbackApplied,
            ProcessingState::DedupCheck,
            ProcessingState::EmitNormalized,
            ProcessingState::EmitDlq,
            ProcessingState::DuplicateDropped,
        ]
        .into_iter()
        .filter(ProcessingState::is_terminal)
        .collect();

        assert_eq!(
            terminal,
            vec![
                ProcessingState::EmitNormalized,
                ProcessingState::EmitDlq,
                ProcessingState::DuplicateDropped
            ]
        );
        assert_eq!(Outcome::Duplicate.state(), ProcessingState::DuplicateDropped);
    }
}
