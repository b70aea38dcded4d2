use chrono::{DateTime, Utc};

/// Microseconds since the Unix epoch, the unit used by every timestamp on the wire.
pub type TimestampMicros = i64;

pub fn now_micros() -> TimestampMicros {
    Utc::now().timestamp_micros()
}

/// Renders a wire timestamp for logs. Out of range values render as `None`.
pub fn to_datetime(micros: TimestampMicros) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_micros() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_to_datetime_round_trips_micros() {
        let micros = 1_700_000_000_123_456;
        let dt = to_datetime(micros).unwrap();
        assert_eq!(dt.timestamp_micros(), micros);
    }
}
