use assert_json_diff::assert_json_include;
use common_types::{issues, ErrorCode, QualityStatus, SourceCoordinates};
use serde_json::json;
use tick_normalizer::test_utils::{
    pipeline, raw_event, raw_event_bytes, MemorySink, RecordingResolver, ResolverReply,
    OCCURRED_AT,
};
use tick_normalizer::Outcome;

fn source(offset: i64) -> SourceCoordinates {
    SourceCoordinates {
        topic: "market_ticks_raw".to_string(),
        partition: 0,
        offset,
    }
}

#[tokio::test]
async fn test_happy_path_emits_canonical_tick() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let event = raw_event("evt-1", Some(r#"{"price": 49.25, "volume": 10.0}"#));

    let outcome = pipeline.process(&event).await.unwrap();

    assert!(matches!(outcome, Outcome::Normalized(_)));
    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 1);
    let tick = &ticks[0];
    assert_eq!(tick.payload.price, 49.25);
    assert_eq!(tick.payload.volume, Some(10.0));
    assert_eq!(tick.payload.quality.status, QualityStatus::Canonical);
    assert!(!tick.payload.quality.issues.contains(issues::MISSING_VOLUME));
    assert_eq!(tick.envelope, event.envelope);
    assert!(tick.payload.normalized_at >= OCCURRED_AT);
    assert!(sink.dead_letters().is_empty());
}

#[tokio::test]
async fn test_missing_price_is_backfilled() {
    let sink = MemorySink::new();
    let resolver = RecordingResolver::returning(101.5);
    let (pipeline, _) = pipeline(sink.clone(), Some(resolver.clone()));
    let event = raw_event("evt-2", Some(r#"{"volume": 3}"#));

    pipeline.process(&event).await.unwrap();

    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].payload.price, 101.5);
    assert_eq!(ticks[0].payload.quality.status, QualityStatus::Fallback);
    assert!(ticks[0].payload.quality.issues.contains(issues::PRICE_BACKFILLED));
    assert_eq!(resolver.calls(), vec!["AAPL.NYSE".to_string()]);
    assert!(sink.dead_letters().is_empty());
}

#[tokio::test]
async fn test_backfill_keeps_earlier_issues_first() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), Some(RecordingResolver::returning(7.0)));
    let event = raw_event("evt-3", Some(r#"{"issues": ["stale_quote"]}"#));

    pipeline.process(&event).await.unwrap();

    let codes: Vec<_> = sink.ticks()[0]
        .payload
        .quality
        .issues
        .iter()
        .map(str::to_string)
        .collect();
    assert_eq!(
        codes,
        vec!["stale_quote", issues::MISSING_VOLUME, issues::PRICE_BACKFILLED]
    );
}

#[tokio::test]
async fn test_missing_price_without_backfill_is_dead_lettered() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let event = raw_event("evt-4", Some(r#"{"volume": 3}"#));

    pipeline.process(&event).await.unwrap();

    assert!(sink.ticks().is_empty());
    let dead_letters = sink.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].error_code, ErrorCode::ContractViolation);
    assert_eq!(dead_letters[0].metadata.issues, issues::MISSING_PRICE);
}

#[tokio::test]
async fn test_backfill_miss_and_failure_are_contract_violations() {
    let sink = MemorySink::new();
    let resolver = RecordingResolver::new([
        ResolverReply::Miss,
        ResolverReply::Fail,
        ResolverReply::Tick(-1.0),
    ]);
    let (pipeline, _) = pipeline(sink.clone(), Some(resolver.clone()));

    for id in ["evt-a", "evt-b", "evt-c"] {
        pipeline
            .process(&raw_event(id, Some(r#"{"volume": 1}"#)))
            .await
            .unwrap();
    }

    assert!(sink.ticks().is_empty());
    let dead_letters = sink.dead_letters();
    let classified: Vec<_> = dead_letters
        .iter()
        .map(|r| (r.failed_event_id.as_str(), r.error_code, r.metadata.issues.as_str()))
        .collect();
    assert_eq!(
        classified,
        vec![
            ("evt-a", ErrorCode::ContractViolation, issues::PRICE_BACKFILL_MISS),
            ("evt-b", ErrorCode::ContractViolation, issues::PRICE_BACKFILL_FAILED),
            ("evt-c", ErrorCode::ContractViolation, issues::PRICE_BACKFILL_MISS),
        ]
    );
    // No retries: one lookup per event
    assert_eq!(resolver.calls().len(), 3);
}

#[tokio::test]
async fn test_absent_payload_is_validation_error() {
    let sink = MemorySink::new();
    let resolver = RecordingResolver::returning(1.0);
    let (pipeline, _) = pipeline(sink.clone(), Some(resolver.clone()));
    let event = raw_event("evt-5", None);

    pipeline.process(&event).await.unwrap();

    assert!(sink.ticks().is_empty());
    let dead_letters = sink.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].error_code, ErrorCode::ValidationError);
    assert_eq!(dead_letters[0].metadata.issues, issues::SCHEMA_VALIDATION_FAILED);
    assert_eq!(dead_letters[0].envelope.as_ref(), Some(&event.envelope));
    assert!(resolver.calls().is_empty());
}

#[tokio::test]
async fn test_missing_instrument_identity() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let mut event = raw_event("evt-6", Some(r#"{"price": 5.0}"#));
    event.payload.metadata.instrument_id = None;

    pipeline.process(&event).await.unwrap();

    assert!(sink.ticks().is_empty());
    let dead_letters = sink.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].error_code, ErrorCode::ContractViolation);
    assert_eq!(dead_letters[0].metadata.issues, issues::MISSING_INSTRUMENT_ID);
}

#[tokio::test]
async fn test_no_instrument_id_and_empty_symbol() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), Some(RecordingResolver::returning(1.0)));
    let mut event = raw_event("evt-11", Some(r#"{"price": 5.0, "volume": 1}"#));
    event.payload.metadata.instrument_id = None;
    event.payload.symbol = String::new();

    let outcome = pipeline.process(&event).await.unwrap();

    assert!(matches!(outcome, Outcome::DeadLettered(_)));
    assert!(sink.ticks().is_empty());
    let dead_letters = sink.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].failed_event_id, "evt-11");
    assert_eq!(dead_letters[0].error_code, ErrorCode::ContractViolation);
    assert_eq!(dead_letters[0].metadata.issues, issues::MISSING_INSTRUMENT_ID);
}

#[tokio::test]
async fn test_caller_asserted_backfill_issue_keeps_canonical_status() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let event = raw_event(
        "evt-12",
        Some(r#"{"price": 49.25, "volume": 1, "issues": ["price_backfilled"]}"#),
    );

    pipeline.process(&event).await.unwrap();

    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].payload.price, 49.25);
    assert_eq!(ticks[0].payload.quality.status, QualityStatus::Canonical);
    assert!(ticks[0].payload.quality.issues.is_empty());
}

#[tokio::test]
async fn test_end_to_end_keyed_output() {
    let sink = MemorySink::new();
    let (pipeline, guard) = pipeline(sink.clone(), None);
    let event = raw_event("evt-1", Some(r#"{"price": 51.5, "volume": 2, "currency": "USD"}"#));

    let outcome = pipeline
        .process_payload(&raw_event_bytes(&event), source(10))
        .await
        .unwrap();

    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 1);
    assert_eq!(ticks[0].key(), "AAPL.NYSE");
    assert_eq!(outcome, Outcome::Normalized(ticks[0].clone()));
    assert!(guard.seen("evt-1"));
    assert!(sink.dead_letters().is_empty());

    assert_json_include!(
        actual: serde_json::to_value(&ticks[0]).unwrap(),
        expected: json!({
            "envelope": {"event_id": "evt-1", "tenant_id": "tenant-a"},
            "payload": {
                "instrument_id": "AAPL.NYSE",
                "symbol": "AAPL",
                "market": "NYSE",
                "price": 51.5,
                "currency": "USD",
                "quality": {"status": "canonical", "issues": []}
            }
        })
    );
}

#[tokio::test]
async fn test_redelivery_emits_nothing() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let event = raw_event("evt-1", Some(r#"{"price": 51.5, "volume": 2}"#));

    pipeline.process(&event).await.unwrap();
    let second = pipeline.process(&event).await.unwrap();

    assert_eq!(second, Outcome::Duplicate);
    assert_eq!(sink.ticks().len(), 1);
    assert!(sink.dead_letters().is_empty());
}

#[tokio::test]
async fn test_redelivered_bad_event_is_dead_lettered_once() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let event = raw_event("evt-7", None);

    pipeline.process(&event).await.unwrap();
    assert_eq!(pipeline.process(&event).await.unwrap(), Outcome::Duplicate);

    assert_eq!(sink.dead_letters().len(), 1);
}

#[tokio::test]
async fn test_publish_failure_rolls_back_guard() {
    let sink = MemorySink::new();
    let (pipeline, guard) = pipeline(sink.clone(), None);
    let event = raw_event("evt-8", Some(r#"{"price": 3.0, "volume": 1}"#));

    sink.fail_next(1);
    assert!(pipeline.process(&event).await.is_err());
    assert!(!guard.seen("evt-8"));
    assert!(sink.ticks().is_empty());

    // The retry goes through instead of being dropped as a duplicate
    let outcome = pipeline.process(&event).await.unwrap();
    assert!(matches!(outcome, Outcome::Normalized(_)));
    assert_eq!(sink.ticks().len(), 1);
}

#[tokio::test]
async fn test_dead_letter_publish_failure_rolls_back_guard() {
    let sink = MemorySink::new();
    let (pipeline, guard) = pipeline(sink.clone(), None);
    let event = raw_event("evt-9", None);

    sink.fail_next(1);
    assert!(pipeline.process(&event).await.is_err());
    assert!(!guard.seen("evt-9"));

    pipeline.process(&event).await.unwrap();
    assert_eq!(sink.dead_letters().len(), 1);
}

#[tokio::test]
async fn test_undecodable_message_is_dead_lettered() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);

    pipeline
        .process_payload(b"definitely not json", source(17))
        .await
        .unwrap();
    pipeline
        .process_payload(
            br#"{"envelope": {"event_id": "evt-partial"}, "payload": {}}"#,
            source(18),
        )
        .await
        .unwrap();

    let dead_letters = sink.dead_letters();
    assert_eq!(dead_letters.len(), 2);

    assert_eq!(dead_letters[0].failed_event_id, "market_ticks_raw:0:17");
    assert_eq!(dead_letters[0].error_code, ErrorCode::ValidationError);
    assert_eq!(dead_letters[0].envelope, None);
    assert_eq!(dead_letters[0].metadata.source, Some(source(17)));

    assert_eq!(dead_letters[1].failed_event_id, "evt-partial");
    assert_eq!(dead_letters[1].metadata.issues, issues::SCHEMA_VALIDATION_FAILED);
}

#[tokio::test]
async fn test_dead_letter_carries_source_and_retry_count() {
    let sink = MemorySink::new();
    let (pipeline, _) = pipeline(sink.clone(), None);
    let mut event = raw_event("evt-10", Some(r#"{"price": 0}"#));
    event.payload.metadata.retry_count = 3;

    pipeline
        .process_payload(&raw_event_bytes(&event), source(99))
        .await
        .unwrap();

    let record = &sink.dead_letters()[0];
    assert_eq!(record.key(), "evt-10");
    assert_eq!(record.metadata.issues, issues::INVALID_PRICE);
    assert_eq!(record.metadata.retry_count, 3);
    assert_eq!(record.metadata.source, Some(source(99)));
}
