//! Journal entries and the user-supplied fields they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::locator::Locator;

/// Mood used when the user does not pick one
pub const DEFAULT_MOOD: &str = "Happy";

/// Validation failures for user-supplied entry fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a title is required")]
    EmptyTitle,
}

/// Identifier assigned by the metadata index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields the user supplies for an entry before anything is recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub title: String,
    pub mood: String,
    pub note: Option<String>,
}

impl EntryDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            mood: DEFAULT_MOOD.to_string(),
            note: None,
        }
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = mood.into();
        self
    }

    /// Set the note; a blank note is stored as no note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.note = if note.trim().is_empty() { None } else { Some(note) };
        self
    }

    /// Check the draft can become an entry. Performs no I/O.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }

    /// Pair the draft with an uploaded artifact's locator
    pub fn into_new_entry(self, artifact_locator: Locator) -> NewEntry {
        NewEntry {
            title: self.title.trim().to_string(),
            mood: self.mood,
            note: self.note,
            artifact_locator,
        }
    }
}

/// Fields handed to the metadata index on create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub title: String,
    pub mood: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub artifact_locator: Locator,
}

/// A persisted journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: EntryId,
    pub title: String,
    pub mood: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub artifact_locator: Locator,
    pub created_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Build the persisted form of `fields` with index-assigned id and timestamp
    pub fn from_new(id: EntryId, fields: NewEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: fields.title,
            mood: fields.mood,
            note: fields.note,
            artifact_locator: fields.artifact_locator,
            created_at,
        }
    }

    /// Case-insensitive substring match on title and note
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();

        self.title.to_lowercase().contains(&query)
            || self
                .note
                .as_deref()
                .map(|note| note.to_lowercase().contains(&query))
                .unwrap_or(false)
    }
}

/// Filter entries for display, preserving their order
pub fn filter_entries<'a>(entries: &'a [JournalEntry], query: &str) -> Vec<&'a JournalEntry> {
    entries.iter().filter(|entry| entry.matches(query)).collect()
}
