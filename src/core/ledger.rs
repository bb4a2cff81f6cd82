//! Append-only event ledger with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy inspection. The ledger is a record, not a source of truth:
//! nothing in the pipeline reads it back to decide what to do.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{JournalEvent, JournalEventType};

/// Ledger I/O failures
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize event: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("corrupt ledger line {line} in {path}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// File-based event ledger using JSONL format
#[derive(Debug, Clone)]
pub struct EventLedger {
    path: PathBuf,
}

impl EventLedger {
    /// Open the ledger at `path`, creating its directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Append an event
    pub async fn append(&self, event: &JournalEvent) -> Result<(), LedgerError> {
        let mut json = serde_json::to_string(event).map_err(LedgerError::Serialize)?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        file.write_all(json.as_bytes()).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<JournalEvent>, LedgerError> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut events = Vec::new();
        let mut line_no = 0;

        while let Some(line) = lines.next_line().await.map_err(|e| self.io_error(e))? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&line).map_err(|source| LedgerError::Parse {
                path: self.path.clone(),
                line: line_no,
                source,
            })?;
            events.push(event);
        }

        Ok(events)
    }

    /// Events of one type, oldest first
    pub async fn events_of_type(
        &self,
        event_type: JournalEventType,
    ) -> Result<Vec<JournalEvent>, LedgerError> {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(|e| e.event_type == event_type).collect())
    }

    /// Every reported orphaned object, oldest first
    pub async fn orphans(&self) -> Result<Vec<JournalEvent>, LedgerError> {
        self.events_of_type(JournalEventType::ObjectOrphaned).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntryId, Locator};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let ledger = EventLedger::open(dir.path().join("nested/events.jsonl")).await.unwrap();

        assert!(ledger.replay().await.unwrap().is_empty());

        ledger
            .append(&JournalEvent::new(JournalEventType::EntryCreated, "created").with_entry(EntryId::new("e1")))
            .await
            .unwrap();
        ledger
            .append(
                &JournalEvent::new(JournalEventType::ObjectOrphaned, "orphaned")
                    .with_locator(Locator::from_raw("memory://artifacts/o/a?alt=media")),
            )
            .await
            .unwrap();

        let events = ledger.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, JournalEventType::EntryCreated);

        let orphans = ledger.orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(
            orphans[0].locator.as_ref().map(Locator::as_str),
            Some("memory://artifacts/o/a?alt=media")
        );
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let ledger = EventLedger::open(&path).await.unwrap();
        let err = ledger.replay().await.unwrap_err();
        assert!(matches!(err, LedgerError::Parse { line: 1, .. }));
    }
}
