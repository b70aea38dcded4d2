use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::TimestampMicros;

/// Envelope shared by every message on the market-data topics. Downstream stages copy it
/// verbatim so tenant and trace identity survive the whole pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event_id: String,
    pub trace_id: String,
    pub schema_version: String,
    pub tenant_id: String,
    pub producer: String,
    pub occurred_at: TimestampMicros,
    pub ingested_at: TimestampMicros,
}

// The event type the ingestion connectors produce
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawIngestionEvent {
    pub envelope: Envelope,
    pub payload: RawPayload,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawPayload {
    #[serde(default)]
    pub source_system: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub received_at: TimestampMicros,
    /// Opaque encoded blob, interpreted according to `encoding`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub metadata: RawMetadata,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Any other producer-specific keys, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct EventIdProbe {
    envelope: EnvelopeIdProbe,
}

#[derive(Deserialize)]
struct EnvelopeIdProbe {
    event_id: String,
}

impl RawIngestionEvent {
    pub fn event_id(&self) -> &str {
        &self.envelope.event_id
    }

    /// Best-effort extraction of `envelope.event_id` from a payload that failed to decode
    /// as a full event, so the failure can still be attributed.
    pub fn probe_event_id(payload: &[u8]) -> Option<String> {
        serde_json::from_slice::<EventIdProbe>(payload)
            .ok()
            .map(|probe| probe.envelope.event_id)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_json() -> Value {
        json!({
            "envelope": {
                "event_id": "evt-1",
                "trace_id": "trace-1",
                "schema_version": "1.0",
                "tenant_id": "tenant-a",
                "producer": "connector-nyse",
                "occurred_at": 1_700_000_000_000_000_i64,
                "ingested_at": 1_700_000_000_500_000_i64
            },
            "payload": {
                "source_system": "nyse-feed",
                "market": "NYSE",
                "symbol": "AAPL",
                "sequence": 42,
                "received_at": 1_700_000_000_200_000_i64,
                "raw_payload": "{\"price\": 49.25}",
                "encoding": "json",
                "metadata": {"instrument_id": "AAPL.NYSE", "retry_count": 2, "venue_code": "XNYS"}
            }
        })
    }

    #[test]
    fn test_raw_event_deserializes() {
        let event: RawIngestionEvent = serde_json::from_value(raw_json()).unwrap();

        assert_eq!(event.event_id(), "evt-1");
        assert_eq!(event.payload.symbol, "AAPL");
        assert_eq!(event.payload.sequence, 42);
        assert_eq!(
            event.payload.metadata.instrument_id.as_deref(),
            Some("AAPL.NYSE")
        );
        assert_eq!(event.payload.metadata.retry_count, 2);
        assert_eq!(event.payload.metadata.extra.get("venue_code"), Some(&json!("XNYS")));
    }

    #[test]
    fn test_missing_payload_fields_default() {
        let mut value = raw_json();
        value["payload"] = json!({});
        let event: RawIngestionEvent = serde_json::from_value(value).unwrap();

        assert!(event.payload.raw_payload.is_none());
        assert!(event.payload.encoding.is_none());
        assert!(event.payload.symbol.is_empty());
        assert!(event.payload.metadata.instrument_id.is_none());
        assert_eq!(event.payload.metadata.retry_count, 0);
    }

    #[test]
    fn test_missing_envelope_field_fails() {
        let mut value = raw_json();
        value["envelope"]
            .as_object_mut()
            .unwrap()
            .remove("tenant_id");
        assert!(serde_json::from_value::<RawIngestionEvent>(value).is_err());
    }

    #[test]
    fn test_probe_event_id() {
        let partial = br#"{"envelope": {"event_id": "evt-9"}, "payload": 12}"#;
        assert_eq!(
            RawIngestionEvent::probe_event_id(partial),
            Some("evt-9".to_string())
        );
        assert_eq!(RawIngestionEvent::probe_event_id(b"not json"), None);
        assert_eq!(
            RawIngestionEvent::probe_event_id(br#"{"envelope": {"event_id": ""}}"#),
            None
        );
    }
}
