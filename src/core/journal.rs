//! Journal pipeline: capture → upload → index, and the reverse for delete.
//!
//! The two stores are independent, so the composite operations can leave an
//! object without an entry. Those cases are never repaired here; they are
//! returned as named errors (see [`PipelineError::orphaned_locator`]), logged
//! and appended to the ledger.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::capture::{CaptureError, Recorder};
use crate::domain::{
    filter_entries, Artifact, ArtifactInfo, EntryDraft, EntryId, JournalEntry, JournalEvent,
    JournalEventType, Locator, ObjectPath, RecordingPhase, ValidationError,
};
use crate::store::{ArtifactStore, MetadataIndex, StoreError};

use super::ledger::EventLedger;

/// Folder objects are uploaded under unless configured otherwise
pub const DEFAULT_OBJECT_PREFIX: &str = "videos";

/// Errors from the composite journal operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("no recording in progress")]
    NotRecording,

    #[error("upload failed, no entry was created: {0}")]
    Upload(#[source] StoreError),

    #[error("entry could not be saved; uploaded object {locator} is orphaned: {source}")]
    MetadataWrite {
        locator: Locator,
        #[source]
        source: StoreError,
    },

    #[error("could not read entries: {0}")]
    MetadataRead(#[source] StoreError),

    #[error("entry {id} could not be deleted, nothing was removed: {source}")]
    MetadataDelete {
        id: EntryId,
        #[source]
        source: StoreError,
    },

    #[error("entry {id} deleted, but object {locator} could not be removed: {source}")]
    ArtifactDelete {
        id: EntryId,
        locator: Locator,
        #[source]
        source: StoreError,
    },

    #[error("entry {0} not found")]
    EntryNotFound(EntryId),

    #[error("no download reference: {0}")]
    Download(#[source] StoreError),
}

impl PipelineError {
    /// The stored object left without an entry, if this error orphaned one
    pub fn orphaned_locator(&self) -> Option<&Locator> {
        match self {
            PipelineError::MetadataWrite { locator, .. }
            | PipelineError::ArtifactDelete { locator, .. } => Some(locator),
            _ => None,
        }
    }

    /// Whether the operation failed from the user's point of view.
    ///
    /// A delete whose object removal failed still removed the entry.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::ArtifactDelete { .. })
    }
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SavedEntry {
    pub id: EntryId,
    pub locator: Locator,
    pub object_path: ObjectPath,
    pub artifact: ArtifactInfo,
}

/// Ties a recorder to an artifact store and a metadata index
pub struct JournalPipeline {
    recorder: Recorder,
    artifacts: Arc<dyn ArtifactStore>,
    index: Arc<dyn MetadataIndex>,
    ledger: Option<EventLedger>,
    object_prefix: String,
}

impl JournalPipeline {
    pub fn new(
        recorder: Recorder,
        artifacts: Arc<dyn ArtifactStore>,
        index: Arc<dyn MetadataIndex>,
    ) -> Self {
        Self {
            recorder,
            artifacts,
            index,
            ledger: None,
            object_prefix: DEFAULT_OBJECT_PREFIX.to_string(),
        }
    }

    /// Record pipeline milestones in `ledger`
    pub fn with_ledger(mut self, ledger: EventLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Upload objects under `prefix` instead of `videos`
    pub fn with_object_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.object_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut Recorder {
        &mut self.recorder
    }

    pub fn ledger(&self) -> Option<&EventLedger> {
        self.ledger.as_ref()
    }

    /// Unique object name: `<prefix>/video_<unix millis>_<8 hex>.<ext>`
    pub fn object_name(&self, artifact: &Artifact) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "video_{}_{}.{}",
            Utc::now().timestamp_millis(),
            &suffix[..8],
            artifact.extension()
        );

        if self.object_prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.object_prefix, file_name)
        }
    }

    async fn record(&self, event: JournalEvent) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.append(&event).await {
                warn!(error = %e, event_type = ?event.event_type, "Failed to append ledger event");
            }
        }
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Validate `draft` and start recording.
    ///
    /// A previous finalized attempt is discarded first.
    pub async fn begin_capture(&mut self, draft: &EntryDraft) -> Result<(), PipelineError> {
        draft.validate()?;

        if self.recorder.phase() == RecordingPhase::Finalized {
            self.recorder.reset();
        }
        self.recorder.start().await?;
        Ok(())
    }

    /// Stop the running attempt and return its artifact
    pub async fn finish_capture(&mut self) -> Result<Artifact, PipelineError> {
        let artifact = self.recorder.stop().await.ok_or(PipelineError::NotRecording)?;
        self.capture_finalized(&artifact).await;
        Ok(artifact)
    }

    async fn capture_finalized(&self, artifact: &Artifact) {
        info!(
            size_bytes = artifact.len(),
            fingerprint = %artifact.fingerprint(),
            "Capture finalized"
        );
        self.record(
            JournalEvent::new(
                JournalEventType::CaptureFinalized,
                format!("{} bytes of {}", artifact.len(), artifact.mime_type()),
            )
            .with_fingerprint(artifact.fingerprint()),
        )
        .await;
    }

    /// Record until `stop_trigger` fires, then save the recording as a new entry.
    ///
    /// The draft is validated before any device or store is touched.
    #[instrument(skip_all, fields(title = %draft.title, mood = %draft.mood))]
    pub async fn capture_and_save<F>(
        &mut self,
        draft: EntryDraft,
        stop_trigger: F,
    ) -> Result<SavedEntry, PipelineError>
    where
        F: Future<Output = ()>,
    {
        draft.validate()?;

        self.begin_capture(&draft).await?;
        let artifact = self.recorder.record_until(stop_trigger).await?;
        self.capture_finalized(&artifact).await;

        self.save(&artifact, &draft).await
    }

    // ========================================================================
    // Persist
    // ========================================================================

    /// Upload `artifact` and create an entry for it.
    ///
    /// No retries. If the entry cannot be written the uploaded object stays
    /// in the store and is reported as orphaned.
    #[instrument(skip_all, fields(title = %draft.title, size_bytes = artifact.len()))]
    pub async fn save(
        &self,
        artifact: &Artifact,
        draft: &EntryDraft,
    ) -> Result<SavedEntry, PipelineError> {
        draft.validate()?;

        let info = artifact.info();
        let object_path = ObjectPath::new(self.object_name(artifact))
            .map_err(|e| PipelineError::Upload(StoreError::InvalidLocator(e)))?;

        let locator = match self
            .artifacts
            .upload(artifact.bytes().clone(), object_path.as_str(), artifact.mime_type())
            .await
        {
            Ok(locator) => locator,
            Err(e) => {
                warn!(error = %e, store = self.artifacts.name(), "Upload failed");
                self.record(
                    JournalEvent::new(JournalEventType::SaveFailed, "upload failed")
                        .with_fingerprint(info.fingerprint.clone())
                        .with_error(e.to_string()),
                )
                .await;
                return Err(PipelineError::Upload(e));
            }
        };

        info!(object = %object_path, store = self.artifacts.name(), "Upload completed");
        self.record(
            JournalEvent::new(JournalEventType::UploadCompleted, object_path.to_string())
                .with_locator(locator.clone())
                .with_fingerprint(info.fingerprint.clone()),
        )
        .await;

        let new_entry = draft.clone().into_new_entry(locator.clone());
        match self.index.create(new_entry).await {
            Ok(id) => {
                info!(id = %id, "Entry created");
                self.record(
                    JournalEvent::new(JournalEventType::EntryCreated, draft.title.trim())
                        .with_entry(id.clone())
                        .with_locator(locator.clone())
                        .with_fingerprint(info.fingerprint.clone()),
                )
                .await;

                Ok(SavedEntry {
                    id,
                    locator,
                    object_path,
                    artifact: info,
                })
            }
            Err(e) => {
                warn!(
                    error = %e,
                    locator = %locator,
                    "Entry write failed, uploaded object is orphaned"
                );
                self.record(
                    JournalEvent::new(JournalEventType::ObjectOrphaned, "entry write failed after upload")
                        .with_locator(locator.clone())
                        .with_fingerprint(info.fingerprint)
                        .with_error(e.to_string()),
                )
                .await;
                Err(PipelineError::MetadataWrite { locator, source: e })
            }
        }
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete an entry, then its stored object.
    ///
    /// If the entry cannot be deleted nothing else is touched. If the object
    /// cannot be deleted the entry stays deleted and the object is reported
    /// as orphaned (`ArtifactDelete`, not fatal).
    #[instrument(skip_all, fields(id = %id))]
    pub async fn delete(&self, id: &EntryId, locator: &Locator) -> Result<(), PipelineError> {
        if let Err(e) = self.index.delete(id).await {
            warn!(error = %e, "Entry delete failed");
            self.record(
                JournalEvent::new(JournalEventType::DeleteFailed, "entry delete failed")
                    .with_entry(id.clone())
                    .with_locator(locator.clone())
                    .with_error(e.to_string()),
            )
            .await;
            return Err(PipelineError::MetadataDelete {
                id: id.clone(),
                source: e,
            });
        }
        info!("Entry deleted");

        // Locators that do not decode never reach the store
        let removed = match locator.object_path() {
            Ok(path) => {
                debug!(object = %path, "Deleting object");
                self.artifacts.delete(locator).await
            }
            Err(e) => Err(StoreError::from(e)),
        };

        match removed {
            Ok(()) => {
                self.record(
                    JournalEvent::new(JournalEventType::EntryDeleted, "entry and object removed")
                        .with_entry(id.clone())
                        .with_locator(locator.clone()),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, locator = %locator, "Object delete failed, object is orphaned");
                self.record(
                    JournalEvent::new(JournalEventType::ObjectOrphaned, "object delete failed after entry delete")
                        .with_entry(id.clone())
                        .with_locator(locator.clone())
                        .with_error(e.to_string()),
                )
                .await;
                Err(PipelineError::ArtifactDelete {
                    id: id.clone(),
                    locator: locator.clone(),
                    source: e,
                })
            }
        }
    }

    /// Look up an entry and delete it with its stored locator
    pub async fn delete_entry(&self, id: &EntryId) -> Result<JournalEntry, PipelineError> {
        let entry = self
            .index
            .get(id)
            .await
            .map_err(PipelineError::MetadataRead)?
            .ok_or_else(|| PipelineError::EntryNotFound(id.clone()))?;

        self.delete(&entry.id, &entry.artifact_locator).await?;
        Ok(entry)
    }

    // ========================================================================
    // Read side
    // ========================================================================

    /// All entries, most recent first
    pub async fn list_entries(&self) -> Result<Vec<JournalEntry>, PipelineError> {
        self.index.list_all().await.map_err(PipelineError::MetadataRead)
    }

    /// Entries whose title or note contains `query` (case-insensitive)
    pub async fn search_entries(&self, query: &str) -> Result<Vec<JournalEntry>, PipelineError> {
        let entries = self.list_entries().await?;
        Ok(filter_entries(&entries, query).into_iter().cloned().collect())
    }

    pub async fn get_entry(&self, id: &EntryId) -> Result<Option<JournalEntry>, PipelineError> {
        self.index.get(id).await.map_err(PipelineError::MetadataRead)
    }

    /// Where the display layer can fetch an entry's recording from
    pub async fn download_reference(&self, entry: &JournalEntry) -> Result<Url, PipelineError> {
        self.artifacts
            .resolve_download_reference(&entry.artifact_locator)
            .await
            .map_err(PipelineError::Download)
    }
}
