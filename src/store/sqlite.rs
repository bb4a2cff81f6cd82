//! SQLite metadata index.
//!
//! One `entries` table. `seq` is an autoincrement tie-breaker so entries
//! created within the same millisecond still list in creation order, and
//! `created_at` never goes backwards even if the wall clock does.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MetadataIndex, StoreError};
use crate::domain::{EntryId, JournalEntry, Locator, NewEntry};

fn acquire_lock(mutex: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Index mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Columns of one `entries` row, before conversion
struct EntryRow {
    id: String,
    title: String,
    mood: String,
    note: Option<String>,
    artifact_locator: String,
    created_at: i64,
}

impl EntryRow {
    const COLUMNS: &'static str = "id, title, mood, note, artifact_locator, created_at";

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            mood: row.get(2)?,
            note: row.get(3)?,
            artifact_locator: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_entry(self) -> Result<JournalEntry, StoreError> {
        let created_at = Utc
            .timestamp_millis_opt(self.created_at)
            .single()
            .ok_or_else(|| {
                StoreError::MetadataRead(format!(
                    "entry {} has invalid created_at {}",
                    self.id, self.created_at
                ))
            })?;

        Ok(JournalEntry {
            id: EntryId::new(self.id),
            title: self.title,
            mood: self.mood,
            note: self.note,
            artifact_locator: Locator::from_raw(self.artifact_locator),
            created_at,
        })
    }
}

/// Metadata index stored in a SQLite database
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteIndex {
    /// Open (creating if needed) the index at `db_path`
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path).map_err(|e| {
            StoreError::MetadataRead(format!("cannot open {}: {}", db_path.display(), e))
        })?;

        let index = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };
        index.initialize()?;
        Ok(index)
    }

    /// In-memory index (tests, dry runs)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::MetadataRead(format!("cannot open in-memory index: {}", e)))?;

        let index = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        index.initialize()?;
        Ok(index)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let conn = acquire_lock(&self.conn);

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                mood TEXT NOT NULL,
                note TEXT,
                artifact_locator TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries (created_at DESC, seq DESC);",
        )
        .map_err(|e| StoreError::MetadataWrite(format!("schema: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl MetadataIndex for SqliteIndex {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create(&self, entry: NewEntry) -> Result<EntryId, StoreError> {
        let conn = acquire_lock(&self.conn);
        let id = Uuid::new_v4().simple().to_string();

        let last: i64 = conn
            .query_row("SELECT COALESCE(MAX(created_at), 0) FROM entries", [], |row| row.get(0))
            .map_err(|e| StoreError::MetadataWrite(e.to_string()))?;
        let created_at = Utc::now().timestamp_millis().max(last);

        conn.execute(
            "INSERT INTO entries (id, title, mood, note, artifact_locator, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                entry.title,
                entry.mood,
                entry.note,
                entry.artifact_locator.as_str(),
                created_at
            ],
        )
        .map_err(|e| StoreError::MetadataWrite(e.to_string()))?;

        debug!(id = %id, created_at, "Inserted entry");
        Ok(EntryId::new(id))
    }

    async fn list_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        let conn = acquire_lock(&self.conn);

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM entries ORDER BY created_at DESC, seq DESC",
                EntryRow::COLUMNS
            ))
            .map_err(|e| StoreError::MetadataRead(e.to_string()))?;

        let rows = stmt
            .query_map([], EntryRow::read)
            .map_err(|e| StoreError::MetadataRead(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::MetadataRead(e.to_string()))?;

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>, StoreError> {
        let conn = acquire_lock(&self.conn);

        let row = conn
            .query_row(
                &format!("SELECT {} FROM entries WHERE id = ?1", EntryRow::COLUMNS),
                params![id.as_str()],
                EntryRow::read,
            )
            .optional()
            .map_err(|e| StoreError::MetadataRead(e.to_string()))?;

        row.map(EntryRow::into_entry).transpose()
    }

    async fn delete(&self, id: &EntryId) -> Result<(), StoreError> {
        let conn = acquire_lock(&self.conn);

        let changed = conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id.as_str()])
            .map_err(|e| StoreError::MetadataWrite(e.to_string()))?;

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_entry(title: &str) -> NewEntry {
        NewEntry {
            title: title.to_string(),
            mood: "Happy".to_string(),
            note: None,
            artifact_locator: Locator::from_raw(format!(
                "file:///objects/o/videos%2F{}.webm?alt=media",
                title
            )),
        }
    }

    #[tokio::test]
    async fn test_most_recent_first() {
        let index = SqliteIndex::in_memory().unwrap();

        let first = index.create(new_entry("first")).await.unwrap();
        let second = index.create(new_entry("second")).await.unwrap();
        let third = index.create(new_entry("third")).await.unwrap();

        let ids: Vec<EntryId> = index
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut entry = new_entry("walk");
        entry.note = Some("by the river".to_string());

        let id = index.create(entry).await.unwrap();
        let stored = index.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.title, "walk");
        assert_eq!(stored.note.as_deref(), Some("by the river"));

        index.delete(&id).await.unwrap();
        assert!(index.get(&id).await.unwrap().is_none());
        assert!(index.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_created_at_never_decreases() {
        let index = SqliteIndex::in_memory().unwrap();
        {
            // Simulate an entry written by a clock running ahead
            let conn = acquire_lock(&index.conn);
            let future = Utc::now().timestamp_millis() + 60_000;
            conn.execute(
                "INSERT INTO entries (id, title, mood, note, artifact_locator, created_at)
                 VALUES ('ahead', 'ahead', 'Happy', NULL, 'x', ?1)",
                params![future],
            )
            .unwrap();
        }

        let id = index.create(new_entry("now")).await.unwrap();
        let entries = index.list_all().await.unwrap();

        assert_eq!(entries[0].id, id);
        assert!(entries[0].created_at >= entries[1].created_at);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");

        let id = {
            let index = SqliteIndex::open(&path).unwrap();
            index.create(new_entry("kept")).await.unwrap()
        };

        let index = SqliteIndex::open(&path).unwrap();
        assert_eq!(index.db_path(), Some(path.as_path()));
        assert_eq!(index.get(&id).await.unwrap().unwrap().title, "kept");
    }
}
