use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Envelope, TimestampMicros};

/// Classification of a message that could not be normalized.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The raw payload could not be decoded at all
    ValidationError,
    /// The payload decoded, but breaks the required-field contract
    ContractViolation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ContractViolation => "CONTRACT_VIOLATION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where on the input topic a failed message was read from.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SourceCoordinates {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for SourceCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterMetadata {
    /// The single most specific issue code
    pub issues: String,
    pub detail: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceCoordinates>,
}

// Terminal record for a raw event that could not be normalized
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterRecord {
    pub dead_letter_id: String,
    pub failed_event_id: String,
    pub error_code: ErrorCode,
    pub metadata: DeadLetterMetadata,
    /// Absent only when the message did not even decode as an event envelope
    pub envelope: Option<Envelope>,
    pub failed_at: TimestampMicros,
}

impl DeadLetterRecord {
    /// The key dead letters are partitioned by
    pub fn key(&self) -> &str {
        &self.failed_event_id
    }
}
