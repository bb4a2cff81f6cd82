//! Domain types for the journal pipeline.
//!
//! This module contains the core data structures:
//! - Artifact: Finalized recordings and the chunk buffer behind them
//! - Recording: Recorder phases and the transition table
//! - Entry: Journal entries and user-supplied drafts
//! - Locator: Durable references to stored objects
//! - Events: Ledger records of pipeline milestones

pub mod artifact;
pub mod entry;
pub mod events;
pub mod locator;
pub mod recording;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactInfo, ChunkBuffer, DEFAULT_MIME_TYPE};
pub use entry::{
    filter_entries, EntryDraft, EntryId, JournalEntry, NewEntry, ValidationError, DEFAULT_MOOD,
};
pub use events::{JournalEvent, JournalEventType};
pub use locator::{Locator, LocatorError, ObjectPath};
pub use recording::{next_phase, RecorderInput, RecordingPhase, Transition};
