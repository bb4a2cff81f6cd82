//! In-memory stores with failure injection.
//!
//! Used by the pipeline tests and for dry runs. Every operation is counted,
//! and each kind of failure can be switched on independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use url::Url;
use uuid::Uuid;

use super::{ArtifactStore, MetadataIndex, StoreError};
use crate::domain::{EntryId, JournalEntry, Locator, NewEntry, ObjectPath};

/// Base of every locator issued by [`MemoryArtifactStore`]
pub const MEMORY_BASE: &str = "memory://artifacts";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Artifact store
// ============================================================================

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Artifact store held in memory
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<ObjectPath, StoredObject>>,
    fail_uploads: AtomicBool,
    fail_deletes: AtomicBool,
    uploads: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Make every upload fail
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every delete fail (objects stay in place)
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Upload attempts, including failed ones
    pub fn upload_calls(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Delete attempts, including failed ones
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// The object behind `locator`, if it is stored here
    pub fn object(&self, locator: &Locator) -> Option<StoredObject> {
        let path = locator.object_path().ok()?;
        if !locator.belongs_to(MEMORY_BASE) {
            return None;
        }
        lock(&self.objects).get(&path).cloned()
    }

    fn path_of(&self, locator: &Locator) -> Result<ObjectPath, StoreError> {
        let path = locator.object_path()?;
        if !locator.belongs_to(MEMORY_BASE) {
            return Err(StoreError::NotFound(locator.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        mime_type: &str,
    ) -> Result<Locator, StoreError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Upload("injected upload failure".to_string()));
        }

        let path = ObjectPath::new(suggested_name)?;
        let mut objects = lock(&self.objects);
        if objects.contains_key(&path) {
            return Err(StoreError::Upload(format!("object already exists: {}", path)));
        }

        let locator = Locator::build(MEMORY_BASE, &path, None);
        objects.insert(
            path,
            StoredObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(locator)
    }

    async fn resolve_download_reference(&self, locator: &Locator) -> Result<Url, StoreError> {
        let path = self.path_of(locator)?;
        if !lock(&self.objects).contains_key(&path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        Ok(locator.url()?)
    }

    async fn delete(&self, locator: &Locator) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Delete("injected delete failure".to_string()));
        }

        let path = self.path_of(locator)?;
        match lock(&self.objects).remove(&path) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }
}

// ============================================================================
// Metadata index
// ============================================================================

/// Metadata index held in memory
#[derive(Default)]
pub struct MemoryIndex {
    /// (insertion sequence, entry)
    entries: Mutex<Vec<(u64, JournalEntry)>>,
    next_seq: AtomicUsize,
    fail_creates: AtomicBool,
    fail_deletes: AtomicBool,
    fail_reads: AtomicBool,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Create attempts, including failed ones
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Delete attempts, including failed ones
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MetadataIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, entry: NewEntry) -> Result<EntryId, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::MetadataWrite("injected write failure".to_string()));
        }

        let mut entries = lock(&self.entries);
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) as u64;
        let id = EntryId::new(Uuid::new_v4().simple().to_string());

        let latest = entries.iter().map(|(_, e)| e.created_at).max();
        let now = Utc::now();
        let created_at = latest.map_or(now, |latest| latest.max(now));

        entries.push((seq, JournalEntry::from_new(id.clone(), entry, created_at)));
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<JournalEntry>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::MetadataRead("injected read failure".to_string()));
        }

        let mut entries = lock(&self.entries).clone();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::MetadataRead("injected read failure".to_string()));
        }

        Ok(lock(&self.entries)
            .iter()
            .find(|(_, e)| &e.id == id)
            .map(|(_, e)| e.clone()))
    }

    async fn delete(&self, id: &EntryId) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::MetadataWrite("injected delete failure".to_string()));
        }

        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|(_, e)| &e.id != id);

        if entries.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_artifact_store_round_trip() {
        let store = MemoryArtifactStore::new();
        let locator = store
            .upload(Bytes::from_static(b"abc"), "videos/x.webm", "video/webm")
            .await
            .unwrap();

        assert_eq!(locator.as_str(), "memory://artifacts/o/videos%2Fx.webm?alt=media");
        assert_eq!(store.object(&locator).unwrap().bytes, Bytes::from_static(b"abc"));
        assert!(store.resolve_download_reference(&locator).await.is_ok());

        store.delete(&locator).await.unwrap();
        assert_eq!(store.object_count(), 0);
        assert_eq!(store.upload_calls(), 1);
        assert_eq!(store.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_counted() {
        let store = MemoryArtifactStore::new();
        store.fail_uploads(true);

        let err = store
            .upload(Bytes::from_static(b"abc"), "videos/x.webm", "video/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Upload(_)));
        assert_eq!(store.upload_calls(), 1);
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn test_index_orders_by_recency() {
        let index = MemoryIndex::new();
        let mk = |title: &str| NewEntry {
            title: title.to_string(),
            mood: "Calm".to_string(),
            note: None,
            artifact_locator: Locator::from_raw("memory://artifacts/o/a?alt=media"),
        };

        let a = index.create(mk("a")).await.unwrap();
        let b = index.create(mk("b")).await.unwrap();

        let listed: Vec<EntryId> = index.list_all().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(listed, vec![b.clone(), a]);

        index.delete(&b).await.unwrap();
        assert!(index.get(&b).await.unwrap().is_none());
        assert!(index.delete(&b).await.unwrap_err().is_not_found());
    }
}
