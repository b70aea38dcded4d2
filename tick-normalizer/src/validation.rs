use base64::{engine::general_purpose::STANDARD, Engine as _};
use common_types::util::{blank_string_is_none, lenient_f64};
use common_types::{issues, IssueSet, RawIngestionEvent};
use serde::Deserialize;

use crate::error::ContractError;

/// Encodings the connectors are allowed to put in `payload.encoding`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// The blob is a JSON document
    Json,
    /// The blob is a standard-alphabet base64 encoding of a JSON document
    Base64,
}

impl PayloadEncoding {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "json" => Some(PayloadEncoding::Json),
            "base64" => Some(PayloadEncoding::Base64),
            _ => None,
        }
    }

    fn decode(&self, blob: &str) -> Result<TickBlob, ContractError> {
        let bytes = match self {
            PayloadEncoding::Json => blob.as_bytes().to_vec(),
            PayloadEncoding::Base64 => STANDARD
                .decode(blob.trim())
                .map_err(|e| ContractError::schema(format!("raw_payload is not valid base64: {e}")))?,
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| ContractError::schema(format!("raw_payload could not be decoded: {e}")))
    }
}

// What we expect to find inside the decoded blob. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct TickBlob {
    #[serde(default, deserialize_with = "lenient_f64")]
    price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    volume: Option<f64>,
    #[serde(default, deserialize_with = "blank_string_is_none")]
    currency: Option<String>,
    #[serde(default, deserialize_with = "blank_string_is_none")]
    instrument_id: Option<String>,
    // Quality issues the connector already knows about
    #[serde(default)]
    issues: Vec<String>,
}

/// The validated content of a raw event. The price may still be missing, that is for the
/// backfill step to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub instrument_id: String,
    pub market: String,
    pub symbol: String,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub currency: Option<String>,
    pub issues: IssueSet,
}

/// Decode the raw payload of an event and enforce the required-field contract.
///
/// Decode failures are classified as `ContractError::Schema` before any field is looked
/// at; field failures as `ContractError::Violation`. A missing price is not an error here.
pub fn validate(event: &RawIngestionEvent) -> Result<ParsedRecord, ContractError> {
    let payload = &event.payload;

    let blob = payload
        .raw_payload
        .as_deref()
        .ok_or_else(|| ContractError::schema("raw_payload is absent"))?;

    let tag = payload
        .encoding
        .as_deref()
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| ContractError::schema("encoding is absent"))?;
    let encoding = PayloadEncoding::parse(tag)
        .ok_or_else(|| ContractError::schema(format!("unsupported encoding {tag:?}")))?;

    let decoded = encoding.decode(blob)?;

    let instrument_id = [
        payload.metadata.instrument_id.as_deref(),
        decoded.instrument_id.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|id| !id.is_empty())
    .map(str::to_string)
    .ok_or_else(|| {
        ContractError::violation(issues::MISSING_INSTRUMENT_ID, "instrument_id is absent")
    })?;

    if payload.symbol.trim().is_empty() {
        return Err(ContractError::violation(
            issues::MISSING_INSTRUMENT_ID,
            "symbol is empty",
        ));
    }

    if let Some(price) = decoded.price {
        if !price.is_finite() || price <= 0.0 {
            return Err(ContractError::violation(
                issues::INVALID_PRICE,
                format!("price {price} is not a positive finite number"),
            ));
        }
    }

    if let Some(volume) = decoded.volume {
        if !volume.is_finite() || volume < 0.0 {
            return Err(ContractError::violation(
                issues::INVALID_VOLUME,
                format!("volume {volume} is not a non-negative finite number"),
            ));
        }
    }

    let mut record_issues = IssueSet::new();
    // Only the backfill step may claim the price was backfilled
    record_issues.extend(
        decoded
            .issues
            .into_iter()
            .filter(|code| code != issues::PRICE_BACKFILLED),
    );
    if decoded.volume.is_none() {
        record_issues.insert(issues::MISSING_VOLUME);
    }

    Ok(ParsedRecord {
        instrument_id,
        market: payload.market.clone(),
        symbol: payload.symbol.clone(),
        price: decoded.price,
        volume: decoded.volume,
        currency: decoded.currency,
        issues: record_issues,
    })
}
