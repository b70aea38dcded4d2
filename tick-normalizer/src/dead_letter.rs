use common_types::{
    DeadLetterMetadata, DeadLetterRecord, Envelope, SourceCoordinates, TimestampMicros,
};
use uuid::Uuid;

use crate::error::ContractError;

/// Everything known about a message at the point it failed
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub event_id: String,
    pub envelope: Option<Envelope>,
    pub retry_count: u32,
    pub source: Option<SourceCoordinates>,
}

impl FailureContext {
    /// Id used when the envelope could not be decoded and carries no usable event id
    pub fn fallback_event_id(source: &SourceCoordinates) -> String {
        source.to_string()
    }
}

/// Build the single dead-letter record for a classified failure. The record's error
/// code and issue always come from the error itself.
pub fn route(
    error: &ContractError,
    context: FailureContext,
    failed_at: TimestampMicros,
) -> DeadLetterRecord {
    DeadLetterRecord {
        dead_letter_id: Uuid::now_v7().to_string(),
        failed_event_id: context.event_id,
        error_code: error.error_code(),
        metadata: DeadLetterMetadata {
            issues: error.issue().to_string(),
            detail: error.detail().to_string(),
            retry_count: context.retry_count,
            source: context.source,
        },
        envelope: context.envelope,
        failed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::raw_event;
    use common_types::{issues, ErrorCode};

    #[test]
    fn test_route_contract_violation() {
        let raw = raw_event("evt-7", None);
        let error = ContractError::violation(issues::MISSING_PRICE, "price is absent");
        let context = FailureContext {
            event_id: "evt-7".to_string(),
            envelope: Some(raw.envelope.clone()),
            retry_count: 2,
            source: None,
        };

        let record = route(&error, context, 42);

        assert_eq!(record.failed_event_id, "evt-7");
        assert_eq!(record.error_code, ErrorCode::ContractViolation);
        assert_eq!(record.metadata.issues, issues::MISSING_PRICE);
        assert_eq!(record.metadata.detail, "price is absent");
        assert_eq!(record.metadata.retry_count, 2);
        assert_eq!(record.envelope, Some(raw.envelope));
        assert_eq!(record.failed_at, 42);
        assert!(Uuid::parse_str(&record.dead_letter_id).is_ok());
    }

    #[test]
    fn test_fallback_event_id_uses_coordinates() {
        let source = SourceCoordinates {
            topic: "market_ticks_raw".to_string(),
            partition: 1,
            offset: 17,
        };
        assert_eq!(
            FailureContext::fallback_event_id(&source),
            "market_ticks_raw:1:17"
        );
    }

    #[test]
    fn test_each_record_gets_its_own_id() {
        let error = ContractError::schema("raw_payload is absent");
        let context = FailureContext {
            event_id: "evt-1".to_string(),
            envelope: None,
            retry_count: 0,
            source: None,
        };

        let first = route(&error, context.clone(), 1);
        let second = route(&error, context, 1);
        assert_eq!(first.error_code, ErrorCode::ValidationError);
        assert_ne!(first.dead_letter_id, second.dead_letter_id);
    }
}
