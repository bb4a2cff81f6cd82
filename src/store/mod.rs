//! Storage backends: artifact objects and entry metadata.
//!
//! Both are capability traits injected into the pipeline:
//! - [`ArtifactStore`]: uploads container bytes, hands out [`Locator`]s
//! - [`MetadataIndex`]: persists [`JournalEntry`] records
//!
//! Neither store knows about the other; keeping them consistent is the
//! pipeline's job.

pub mod fs;
pub mod http;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::domain::{EntryId, JournalEntry, Locator, LocatorError, NewEntry};

pub use fs::FsArtifactStore;
pub use http::HttpArtifactStore;
pub use memory::{MemoryArtifactStore, MemoryIndex};
pub use sqlite::SqliteIndex;

/// Errors from artifact stores and metadata indexes
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("metadata write failed: {0}")]
    MetadataWrite(String),

    #[error("metadata read failed: {0}")]
    MetadataRead(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(#[from] LocatorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Durable object storage for finalized artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Store `bytes` under `suggested_name` and return its locator.
    ///
    /// No deduplication: callers provide unique names.
    async fn upload(&self, bytes: Bytes, suggested_name: &str, mime_type: &str)
        -> Result<Locator, StoreError>;

    /// A URL the display layer can fetch the object from
    async fn resolve_download_reference(&self, locator: &Locator) -> Result<Url, StoreError>;

    /// Remove the object behind `locator`
    async fn delete(&self, locator: &Locator) -> Result<(), StoreError>;
}

/// Durable index of journal entries
#[async_trait]
pub trait MetadataIndex: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Persist a new entry; the index assigns id and creation time
    async fn create(&self, entry: NewEntry) -> Result<EntryId, StoreError>;

    /// Every entry, most recently created first
    async fn list_all(&self) -> Result<Vec<JournalEntry>, StoreError>;

    async fn get(&self, id: &EntryId) -> Result<Option<JournalEntry>, StoreError>;

    /// Remove an entry. `NotFound` if it does not exist.
    async fn delete(&self, id: &EntryId) -> Result<(), StoreError>;
}
