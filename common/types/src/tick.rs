use serde::{Deserialize, Serialize};

use crate::{issues, Envelope, TimestampMicros};

// The event type the normalizer produces, and every later stage consumes
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CanonicalTick {
    pub envelope: Envelope,
    pub payload: CanonicalPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CanonicalPayload {
    pub instrument_id: String,
    pub market: String,
    pub symbol: String,
    pub source_system: String,
    pub sequence: u64,
    pub price: f64,
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub normalized_at: TimestampMicros,
    pub quality: Quality,
}

impl CanonicalTick {
    /// The key ticks are partitioned by on the normalized topic
    pub fn key(&self) -> &str {
        &self.payload.instrument_id
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    /// Every value came straight from the source payload
    Canonical,
    /// At least one required value was backfilled
    Fallback,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Quality {
    pub status: QualityStatus,
    pub issues: IssueSet,
}

impl Quality {
    /// The status is derived from the issues, so the two can never disagree.
    pub fn from_issues(codes: IssueSet) -> Self {
        let status = if codes.contains(issues::PRICE_BACKFILLED) {
            QualityStatus::Fallback
        } else {
            QualityStatus::Canonical
        };
        Self {
            status,
            issues: codes,
        }
    }
}

/// Ordered set of issue codes: insertion order is kept and duplicates are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct IssueSet(Vec<String>);

impl IssueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the code was already present.
    pub fn insert(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        if self.contains(&code) {
            return false;
        }
        self.0.push(code);
        true
    }

    pub fn extend<I, S>(&mut self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for code in codes {
            self.insert(code);
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.iter().any(|c| c == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for IssueSet {
    fn from(codes: Vec<String>) -> Self {
        let mut set = IssueSet::new();
        set.extend(codes);
        set
    }
}

impl From<IssueSet> for Vec<String> {
    fn from(set: IssueSet) -> Self {
        set.0
    }
}
