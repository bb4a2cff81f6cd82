//! Journal Pipeline Integration Tests
//!
//! Tests for the composite save and delete operations across the artifact
//! store and the metadata index, including partial failures.

use std::future::pending;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use vidjournal::capture::{CaptureError, Recorder, RecorderSettings, ScriptStep, ScriptedDevice};
use vidjournal::core::{EventLedger, JournalPipeline, PipelineError};
use vidjournal::domain::{
    Artifact, EntryDraft, EntryId, JournalEventType, Locator, RecordingPhase, ValidationError,
};
use vidjournal::store::{
    ArtifactStore, FsArtifactStore, MemoryArtifactStore, MemoryIndex, MetadataIndex, SqliteIndex,
    StoreError,
};

struct Harness {
    device: Arc<ScriptedDevice>,
    artifacts: Arc<MemoryArtifactStore>,
    index: Arc<MemoryIndex>,
    pipeline: JournalPipeline,
}

fn harness(script: Vec<ScriptStep>) -> Harness {
    let device = Arc::new(ScriptedDevice::new(script));
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let index = Arc::new(MemoryIndex::new());

    let recorder = Recorder::new(device.clone(), RecorderSettings::default());
    let pipeline = JournalPipeline::new(recorder, artifacts.clone(), index.clone());

    Harness {
        device,
        artifacts,
        index,
        pipeline,
    }
}

fn clip(data: &'static [u8]) -> Artifact {
    Artifact::new(Bytes::from_static(data), "video/webm")
}

#[tokio::test]
async fn test_blank_title_touches_nothing() {
    let mut h = harness(vec![ScriptStep::chunk(b"frame")]);

    let err = h
        .pipeline
        .capture_and_save(EntryDraft::new("   "), async {})
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(ValidationError::EmptyTitle)));
    assert_eq!(h.device.acquisitions(), 0);
    assert_eq!(h.artifacts.upload_calls(), 0);
    assert_eq!(h.index.create_calls(), 0);
    assert_eq!(h.pipeline.recorder().phase(), RecordingPhase::Idle);

    let err = h.pipeline.save(&clip(b"x"), &EntryDraft::new("")).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(ValidationError::EmptyTitle)));
    assert_eq!(h.artifacts.upload_calls(), 0);
}

#[tokio::test]
async fn test_capture_and_save_creates_newest_entry() {
    let mut h = harness(vec![ScriptStep::chunk(b"AAA"), ScriptStep::chunk(b"BB")]);

    h.pipeline
        .save(&clip(b"older"), &EntryDraft::new("Yesterday"))
        .await
        .unwrap();

    let saved = h
        .pipeline
        .capture_and_save(
            EntryDraft::new("  Morning walk ").with_mood("Calm").with_note("by the river"),
            tokio::time::sleep(std::time::Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert_eq!(saved.artifact.size_bytes, 5);
    assert!(saved.object_path.as_str().starts_with("videos/video_"));
    assert!(saved.object_path.as_str().ends_with(".webm"));

    let stored = h.artifacts.object(&saved.locator).unwrap();
    assert_eq!(stored.bytes.as_ref(), b"AAABB");

    let entries = h.pipeline.list_entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, saved.id);
    assert_eq!(entries[0].title, "Morning walk");
    assert_eq!(entries[0].mood, "Calm");
    assert_eq!(entries[0].note.as_deref(), Some("by the river"));
    assert_eq!(entries[0].artifact_locator, saved.locator);
    assert!(entries[0].created_at >= entries[1].created_at);

    let url = h.pipeline.download_reference(&entries[0]).await.unwrap();
    assert_eq!(url.as_str(), saved.locator.as_str());

    assert_eq!(h.device.releases(), 1);
    assert_eq!(h.pipeline.recorder().phase(), RecordingPhase::Finalized);
}

#[tokio::test]
async fn test_capture_without_chunks_still_saves() {
    let mut h = harness(vec![]);

    let saved = h
        .pipeline
        .capture_and_save(EntryDraft::new("Stopped at once"), async {})
        .await
        .unwrap();

    assert_eq!(saved.artifact.size_bytes, 0);
    assert_eq!(h.device.acquisitions(), 1);
    assert_eq!(h.device.releases(), 1);
    assert_eq!(h.artifacts.upload_calls(), 1);

    let entries = h.pipeline.list_entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, saved.id);
    assert!(h.artifacts.object(&saved.locator).unwrap().bytes.is_empty());
}

#[tokio::test]
async fn test_capture_failure_saves_nothing() {
    let mut h = harness(vec![ScriptStep::chunk(b"a"), ScriptStep::fault("encoder crashed", true)]);

    let err = h
        .pipeline
        .capture_and_save(EntryDraft::new("Crash"), pending())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Capture(CaptureError::Encoding(_))));
    assert_eq!(h.artifacts.upload_calls(), 0);
    assert_eq!(h.index.create_calls(), 0);
}

#[tokio::test]
async fn test_pipeline_can_record_again_after_finalize() {
    let mut h = harness(vec![ScriptStep::chunk(b"take")]);

    h.pipeline.capture_and_save(EntryDraft::new("One"), async {}).await.unwrap();
    h.pipeline.capture_and_save(EntryDraft::new("Two"), async {}).await.unwrap();

    assert_eq!(h.device.acquisitions(), 2);
    assert_eq!(h.index.len(), 2);
    assert_eq!(h.artifacts.object_count(), 2);
}

#[tokio::test]
async fn test_upload_failure_creates_no_entry() {
    let h = harness(vec![]);
    h.artifacts.fail_uploads(true);

    let err = h
        .pipeline
        .save(&clip(b"data"), &EntryDraft::new("Lost"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Upload(_)));
    assert!(err.orphaned_locator().is_none());
    assert_eq!(h.index.create_calls(), 0);
    assert_eq!(h.artifacts.object_count(), 0);
}

#[tokio::test]
async fn test_metadata_write_failure_reports_orphan() {
    let dir = TempDir::new().unwrap();
    let ledger = EventLedger::open(dir.path().join("events.jsonl")).await.unwrap();

    let device = Arc::new(ScriptedDevice::new(vec![]));
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let index = Arc::new(MemoryIndex::new());
    index.fail_creates(true);

    let pipeline = JournalPipeline::new(
        Recorder::new(device, RecorderSettings::default()),
        artifacts.clone(),
        index.clone(),
    )
    .with_ledger(ledger.clone());

    let err = pipeline
        .save(&clip(b"precious"), &EntryDraft::new("Orphan"))
        .await
        .unwrap_err();

    let locator = match &err {
        PipelineError::MetadataWrite { locator, .. } => locator.clone(),
        other => panic!("unexpected error: {:?}", other),
    };
    assert_eq!(err.orphaned_locator(), Some(&locator));
    assert!(err.is_fatal());

    // The object is still retrievable
    assert_eq!(artifacts.object(&locator).unwrap().bytes.as_ref(), b"precious");
    assert!(artifacts.resolve_download_reference(&locator).await.is_ok());
    assert!(index.is_empty());

    let orphans = ledger.orphans().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].locator.as_ref(), Some(&locator));
    assert!(orphans[0].fingerprint.is_some());

    let uploads = ledger
        .events_of_type(JournalEventType::UploadCompleted)
        .await
        .unwrap();
    assert_eq!(uploads.len(), 1);
}

#[tokio::test]
async fn test_delete_removes_entry_and_object() {
    let dir = TempDir::new().unwrap();
    let ledger = EventLedger::open(dir.path().join("events.jsonl")).await.unwrap();

    let h = harness(vec![]);
    let pipeline = h.pipeline.with_ledger(ledger.clone());

    let saved = pipeline.save(&clip(b"bye"), &EntryDraft::new("Gone")).await.unwrap();
    let entry = pipeline.delete_entry(&saved.id).await.unwrap();

    assert_eq!(entry.id, saved.id);
    assert!(h.index.is_empty());
    assert_eq!(h.artifacts.object_count(), 0);
    assert_eq!(h.artifacts.delete_calls(), 1);

    let events: Vec<JournalEventType> = ledger
        .replay()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        events,
        vec![
            JournalEventType::UploadCompleted,
            JournalEventType::EntryCreated,
            JournalEventType::EntryDeleted,
        ]
    );
}

#[tokio::test]
async fn test_artifact_delete_failure_is_not_fatal() {
    let h = harness(vec![]);
    let saved = h
        .pipeline
        .save(&clip(b"sticky"), &EntryDraft::new("Sticky"))
        .await
        .unwrap();

    h.artifacts.fail_deletes(true);
    let err = h.pipeline.delete(&saved.id, &saved.locator).await.unwrap_err();

    assert!(matches!(err, PipelineError::ArtifactDelete { .. }));
    assert!(!err.is_fatal());
    assert_eq!(err.orphaned_locator(), Some(&saved.locator));

    // Entry gone, object left behind
    assert!(h.pipeline.get_entry(&saved.id).await.unwrap().is_none());
    assert_eq!(h.artifacts.object_count(), 1);
}

#[tokio::test]
async fn test_broken_locator_still_deletes_entry() {
    let h = harness(vec![]);
    let saved = h
        .pipeline
        .save(&clip(b"data"), &EntryDraft::new("Broken"))
        .await
        .unwrap();

    let broken = Locator::from_raw("not a locator");
    let err = h.pipeline.delete(&saved.id, &broken).await.unwrap_err();

    match &err {
        PipelineError::ArtifactDelete { source, .. } => {
            assert!(matches!(source, StoreError::InvalidLocator(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!err.is_fatal());
    assert!(h.index.is_empty());
    assert_eq!(h.artifacts.delete_calls(), 0);
}

#[tokio::test]
async fn test_metadata_delete_failure_leaves_storage_untouched() {
    let h = harness(vec![]);
    let saved = h
        .pipeline
        .save(&clip(b"keep"), &EntryDraft::new("Keep"))
        .await
        .unwrap();

    h.index.fail_deletes(true);
    let err = h.pipeline.delete(&saved.id, &saved.locator).await.unwrap_err();

    assert!(matches!(err, PipelineError::MetadataDelete { .. }));
    assert!(err.is_fatal());
    assert!(err.orphaned_locator().is_none());
    assert_eq!(h.artifacts.delete_calls(), 0);
    assert_eq!(h.artifacts.object_count(), 1);
    assert_eq!(h.index.len(), 1);
}

#[tokio::test]
async fn test_delete_unknown_entry() {
    let h = harness(vec![]);
    let err = h
        .pipeline
        .delete_entry(&EntryId::new("missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::EntryNotFound(_)));
}

#[tokio::test]
async fn test_search_entries() {
    let h = harness(vec![]);
    h.pipeline
        .save(&clip(b"1"), &EntryDraft::new("Beach day").with_note("sunny"))
        .await
        .unwrap();
    h.pipeline
        .save(&clip(b"2"), &EntryDraft::new("Work").with_note("Long MEETING"))
        .await
        .unwrap();

    let found = h.pipeline.search_entries("meeting").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Work");

    assert_eq!(h.pipeline.search_entries("").await.unwrap().len(), 2);
    assert!(h.pipeline.search_entries("mountain").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_failure_surfaces() {
    let h = harness(vec![]);
    h.index.fail_reads(true);

    assert!(matches!(
        h.pipeline.list_entries().await,
        Err(PipelineError::MetadataRead(_))
    ));
}

#[tokio::test]
async fn test_fs_and_sqlite_backends() {
    let dir = TempDir::new().unwrap();
    let artifacts: Arc<dyn ArtifactStore> =
        Arc::new(FsArtifactStore::open(dir.path().join("objects")).unwrap());
    let index: Arc<dyn MetadataIndex> = Arc::new(SqliteIndex::open(dir.path().join("index.db")).unwrap());

    let pipeline = JournalPipeline::new(
        Recorder::new(
            Arc::new(ScriptedDevice::new(vec![ScriptStep::chunk(b"on disk")])),
            RecorderSettings::default(),
        ),
        artifacts,
        index,
    )
    .with_object_prefix("clips");

    let saved = pipeline.save(&clip(b"on disk"), &EntryDraft::new("Disk")).await.unwrap();
    assert!(saved.locator.as_str().starts_with("file://"));

    let entry = pipeline.get_entry(&saved.id).await.unwrap().unwrap();
    let url = pipeline.download_reference(&entry).await.unwrap();
    let path = url.to_file_path().unwrap();
    assert!(path.starts_with(dir.path().join("objects").canonicalize().unwrap().join("clips")));
    assert_eq!(std::fs::read(&path).unwrap(), b"on disk");

    pipeline.delete_entry(&saved.id).await.unwrap();
    assert!(!path.exists());
    assert!(pipeline.list_entries().await.unwrap().is_empty());
}
