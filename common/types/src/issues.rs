//! Issue codes carried in `quality.issues` of canonical ticks and in
//! `metadata.issues` of dead-letter records.

/// The raw payload is absent, its encoding is empty or unsupported, or it does not decode.
pub const SCHEMA_VALIDATION_FAILED: &str = "schema_validation_failed";

/// Neither the metadata nor the payload resolve an instrument id, or the symbol is empty.
pub const MISSING_INSTRUMENT_ID: &str = "missing_instrument_id";

/// The payload carries a price that is not a finite, positive number.
pub const INVALID_PRICE: &str = "invalid_price";

/// The payload carries a volume that is not a finite, non-negative number.
pub const INVALID_VOLUME: &str = "invalid_volume";

/// The payload has no volume. Volume is optional, so this is only a quality flag.
pub const MISSING_VOLUME: &str = "missing_volume";

/// The payload has no price and backfill is disabled.
pub const MISSING_PRICE: &str = "missing_price";

/// The backfill lookup returned no usable tick.
pub const PRICE_BACKFILL_MISS: &str = "price_backfill_miss";

/// The backfill lookup failed.
pub const PRICE_BACKFILL_FAILED: &str = "price_backfill_failed";

/// The price was taken from the backfill lookup rather than the payload.
pub const PRICE_BACKFILLED: &str = "price_backfilled";
