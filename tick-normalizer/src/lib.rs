//! Tick normalizer service.
//!
//! Reads raw market events from Kafka, validates and normalizes them into canonical ticks,
//! backfills missing prices from the historical store, and routes anything that can't be
//! normalized to the dead-letter topic. Every event id produces at most one output per
//! idempotency window, however often it is delivered.

pub mod app_context;
pub mod backfill;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod health;
pub mod idempotency;
pub mod kafka;
pub mod metrics_consts;
pub mod normalizer;
pub mod pipeline;
pub mod server;
pub mod sink;
pub mod test_utils;
pub mod validation;
pub mod worker;

pub use pipeline::{Outcome, ProcessingState, TickPipeline};
