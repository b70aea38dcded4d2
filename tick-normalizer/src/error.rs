use common_types::{issues, ErrorCode};
use rdkafka::error::KafkaError;
use thiserror::Error;

/// Why a raw event cannot become a canonical tick. Every variant ends up on the
/// dead-letter topic; none of them stops a worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    /// The payload could not be decoded at all
    #[error("schema validation failed: {detail}")]
    Schema { detail: String },

    /// The payload decoded, but a required field is missing or out of range
    #[error("contract violation ({issue}): {detail}")]
    Violation { issue: &'static str, detail: String },
}

impl ContractError {
    pub fn schema(detail: impl Into<String>) -> Self {
        ContractError::Schema {
            detail: detail.into(),
        }
    }

    pub fn violation(issue: &'static str, detail: impl Into<String>) -> Self {
        ContractError::Violation {
            issue,
            detail: detail.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ContractError::Schema { .. } => ErrorCode::ValidationError,
            ContractError::Violation { .. } => ErrorCode::ContractViolation,
        }
    }

    /// The single most specific issue code for this failure
    pub fn issue(&self) -> &'static str {
        match self {
            ContractError::Schema { .. } => issues::SCHEMA_VALIDATION_FAILED,
            ContractError::Violation { issue, .. } => issue,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            ContractError::Schema { detail } | ContractError::Violation { detail, .. } => detail,
        }
    }
}

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("request to historical store failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("historical store returned status {status} for {instrument_id}")]
    Status { instrument_id: String, status: u16 },

    #[error("could not decode latest tick for {instrument_id}: {reason}")]
    Decode {
        instrument_id: String,
        reason: String,
    },

    #[error("invalid historical store URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("record for {instrument_id} has no price")]
    MissingPrice { instrument_id: String },
}

/// Infrastructure failures. A message that hits one of these has not reached a terminal
/// state, so its offset must not advance.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to flush producer: {0}")]
    Flush(KafkaError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl PipelineError {
    pub fn publish(topic: impl Into<String>, error: &KafkaError) -> Self {
        PipelineError::Publish {
            topic: topic.into(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let schema = ContractError::schema("raw_payload is absent");
        assert_eq!(schema.error_code(), ErrorCode::ValidationError);
        assert_eq!(schema.issue(), issues::SCHEMA_VALIDATION_FAILED);
        assert_eq!(schema.detail(), "raw_payload is absent");

        let violation = ContractError::violation(issues::INVALID_PRICE, "price -1 is not positive");
        assert_eq!(violation.error_code(), ErrorCode::ContractViolation);
        assert_eq!(violation.issue(), issues::INVALID_PRICE);
        assert_eq!(
            violation.to_string(),
            "contract violation (invalid_price): price -1 is not positive"
        );
    }
}
