use common_types::{
    issues, CanonicalPayload, CanonicalTick, Quality, RawIngestionEvent, TimestampMicros,
};

use crate::error::NormalizeError;
use crate::validation::ParsedRecord;

/// Build the canonical tick for a validated record whose price has been resolved.
///
/// The envelope is copied as-is. Issues accumulate in order: the record's own issues,
/// then `price_backfilled` if the price came from the historical store.
pub fn normalize(
    record: ParsedRecord,
    raw: &RawIngestionEvent,
    backfilled: bool,
    now: TimestampMicros,
) -> Result<CanonicalTick, NormalizeError> {
    let Some(price) = record.price else {
        return Err(NormalizeError::MissingPrice {
            instrument_id: record.instrument_id,
        });
    };

    let mut codes = record.issues;
    if backfilled {
        codes.insert(issues::PRICE_BACKFILLED);
    }

    // Clock skew between us and the connector must not make a tick look normalized
    // before it happened
    let normalized_at = now.max(raw.envelope.occurred_at);

    Ok(CanonicalTick {
        envelope: raw.envelope.clone(),
        payload: CanonicalPayload {
            instrument_id: record.instrument_id,
            market: record.market,
            symbol: record.symbol,
            source_system: raw.payload.source_system.clone(),
            sequence: raw.payload.sequence,
            price,
            volume: record.volume,
            currency: record.currency,
            normalized_at,
            quality: Quality::from_issues(codes),
        },
    })
}
