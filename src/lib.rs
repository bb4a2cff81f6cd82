//! vidjournal - Video journal recorder
//!
//! Records a clip from a capture device, uploads it to an object store and
//! files a journal entry pointing at it.
//!
//! # Architecture
//!
//! Capture and persistence are separate layers joined by the pipeline:
//! - The recorder turns a live device stream into one in-memory artifact
//! - The artifact store holds the bytes and hands out locators
//! - The metadata index holds entries that reference those locators
//! - The pipeline keeps the two stores consistent and reports what it can't fix
//!
//! # Modules
//!
//! - `capture`: Devices, encoders and the recording state machine
//! - `store`: Artifact stores (fs, http, memory) and metadata indexes (sqlite, memory)
//! - `core`: Journal pipeline and event ledger
//! - `domain`: Data structures (Artifact, JournalEntry, Locator, JournalEvent)
//! - `config`: Configuration discovery and resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Record until Ctrl-C
//! vidjournal record --title "Morning walk" --mood Calm
//!
//! # List and search entries
//! vidjournal list --search walk
//!
//! # Delete an entry and its recording
//! vidjournal delete <entry-id>
//! ```

pub mod capture;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use capture::{CaptureError, DeviceCaptureSession, Recorder, RecorderSettings};
pub use core::{EventLedger, JournalPipeline, PipelineError, SavedEntry};
pub use domain::{Artifact, EntryDraft, EntryId, JournalEntry, Locator, RecordingPhase};
pub use store::{ArtifactStore, MetadataIndex, StoreError};
