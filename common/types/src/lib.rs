mod dead_letter;
mod event;
mod tick;
mod timestamp;

// Raw events, as produced by the ingestion connectors
pub use event::Envelope;
pub use event::RawIngestionEvent;
pub use event::RawMetadata;
pub use event::RawPayload;

// Canonical ticks
pub use tick::CanonicalPayload;
pub use tick::CanonicalTick;
pub use tick::IssueSet;
pub use tick::Quality;
pub use tick::QualityStatus;

// Dead letters
pub use dead_letter::DeadLetterMetadata;
pub use dead_letter::DeadLetterRecord;
pub use dead_letter::ErrorCode;
pub use dead_letter::SourceCoordinates;

// Time
pub use timestamp::now_micros;
pub use timestamp::to_datetime;
pub use timestamp::TimestampMicros;

// Issue codes shared by every stage
pub mod issues;

// Utils
pub mod util;
