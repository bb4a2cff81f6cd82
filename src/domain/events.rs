//! Pipeline events recorded in the append-only ledger.
//!
//! Every composite operation (save, delete) leaves a trail of events. The
//! ledger is never used to repair anything; replaying it tells an operator
//! which stored objects were orphaned by a partially failed operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::EntryId;
use super::locator::Locator;

/// A single event in the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Type of event
    pub event_type: JournalEventType,

    /// Entry the event refers to (if one exists yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,

    /// Locator of the stored object (if one exists yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,

    /// Artifact fingerprint (first 16 hex chars of SHA256)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Human-readable summary (NO user content beyond the title)
    pub summary: String,

    /// Error message if something failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JournalEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: JournalEventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            entry_id: None,
            locator: None,
            fingerprint: None,
            summary: summary.into(),
            error: None,
        }
    }

    pub fn with_entry(mut self, entry_id: EntryId) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of ledger events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEventType {
    /// A recording attempt produced an artifact
    CaptureFinalized,

    /// The artifact reached the object store
    UploadCompleted,

    /// The metadata record was written
    EntryCreated,

    /// Save stopped before an entry was created
    SaveFailed,

    /// Entry and object were both removed
    EntryDeleted,

    /// The metadata record could not be removed; nothing changed
    DeleteFailed,

    /// A stored object was left without a referencing entry
    ObjectOrphaned,
}
