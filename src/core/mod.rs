//! Core orchestration logic.
//!
//! This module contains:
//! - JournalPipeline: Capture, save and delete across the two stores
//! - EventLedger: Append-only record of pipeline milestones

pub mod journal;
pub mod ledger;

// Re-export commonly used types
pub use journal::{JournalPipeline, PipelineError, SavedEntry, DEFAULT_OBJECT_PREFIX};
pub use ledger::{EventLedger, LedgerError};
