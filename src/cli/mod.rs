//! Command-line interface for vidjournal.
//!
//! Provides commands for recording entries, listing and searching them,
//! showing where a recording can be fetched from, and deleting entries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::capture::{CommandDevice, DeviceCaptureSession, Recorder, ScriptStep, ScriptedDevice};
use crate::config::{self, DeviceKind, ResolvedConfig, StorageBackend};
use crate::core::{EventLedger, JournalPipeline, PipelineError};
use crate::domain::{EntryDraft, EntryId, JournalEntry};
use crate::store::{ArtifactStore, FsArtifactStore, HttpArtifactStore, MetadataIndex, SqliteIndex};

/// vidjournal - Video journal recorder
#[derive(Parser, Debug)]
#[command(name = "vidjournal")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a new journal entry
    Record {
        /// Entry title
        #[arg(short, long)]
        title: String,

        /// Mood label (defaults to "Happy")
        #[arg(short, long)]
        mood: Option<String>,

        /// Free-form note
        #[arg(short, long)]
        note: Option<String>,

        /// Stop after this many seconds (otherwise Ctrl-C stops)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Capture device (overrides capture.device in config)
        #[arg(long, value_enum)]
        device: Option<DeviceKind>,
    },

    /// List entries, most recent first
    List {
        /// Only entries whose title or note contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show an entry and where its recording can be fetched from
    Show {
        /// Entry ID (a unique prefix is enough)
        entry_id: String,
    },

    /// Delete an entry and its recording
    Delete {
        /// Entry ID (a unique prefix is enough)
        entry_id: String,
    },

    /// List stored objects that no entry refers to
    Orphans,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Record {
                title,
                mood,
                note,
                duration,
                device,
            } => {
                record_entry(title, mood, note, duration, device).await
            }
            Commands::List { search, limit } => {
                list_entries(search.as_deref(), limit).await
            }
            Commands::Show { entry_id } => {
                show_entry(&entry_id).await
            }
            Commands::Delete { entry_id } => {
                delete_entry(&entry_id).await
            }
            Commands::Orphans => {
                list_orphans().await
            }
            Commands::Config => {
                show_config().await
            }
        }
    }
}

/// Test pattern played by the scripted device
fn test_pattern() -> Vec<ScriptStep> {
    vec![
        ScriptStep::chunk(b"\x1a\x45\xdf\xa3"),
        ScriptStep::chunk(b"vidjournal test pattern"),
        ScriptStep::chunk(b"\x1f\x43\xb6\x75"),
    ]
}

fn build_device(cfg: &ResolvedConfig, kind: DeviceKind) -> Arc<dyn DeviceCaptureSession> {
    match kind {
        DeviceKind::Command => Arc::new(CommandDevice::new(cfg.capture.command.clone())),
        DeviceKind::Scripted => Arc::new(
            ScriptedDevice::new(test_pattern()).with_tail(vec![ScriptStep::chunk(b"\x1c\x53\xbb\x6b")]),
        ),
    }
}

fn build_artifact_store(cfg: &ResolvedConfig) -> Result<Arc<dyn ArtifactStore>> {
    let storage = &cfg.storage;

    match storage.backend {
        StorageBackend::Fs => {
            let store = FsArtifactStore::open(&cfg.objects_dir).with_context(|| {
                format!("Failed to open object directory: {}", cfg.objects_dir.display())
            })?;
            Ok(Arc::new(store))
        }
        StorageBackend::Http => {
            let endpoint = storage
                .endpoint
                .as_ref()
                .context("storage.endpoint is required for the http backend")?;
            let bucket = storage
                .bucket
                .as_deref()
                .context("storage.bucket is required for the http backend")?;

            let mut store = HttpArtifactStore::new(endpoint, bucket)?;
            if let Some(token) = &storage.auth_token {
                store = store.with_auth_token(token.clone());
            }
            Ok(Arc::new(store))
        }
    }
}

/// Wire the configured device, stores and ledger into a pipeline
async fn build_pipeline(device: Option<DeviceKind>) -> Result<JournalPipeline> {
    let cfg = config::config()?;

    let device = build_device(cfg, device.unwrap_or(cfg.capture.device));
    let recorder = Recorder::new(device, cfg.capture.recorder.clone());

    let artifacts = build_artifact_store(cfg)?;
    let index: Arc<dyn MetadataIndex> = Arc::new(
        SqliteIndex::open(&cfg.index_path)
            .with_context(|| format!("Failed to open index: {}", cfg.index_path.display()))?,
    );
    let ledger = EventLedger::open(&cfg.ledger_path).await?;

    Ok(JournalPipeline::new(recorder, artifacts, index)
        .with_ledger(ledger)
        .with_object_prefix(cfg.storage.object_prefix.clone()))
}

/// Find an entry by full ID or unique ID prefix
async fn find_entry(pipeline: &JournalPipeline, entry_id: &str) -> Result<JournalEntry> {
    if let Some(entry) = pipeline.get_entry(&EntryId::new(entry_id)).await? {
        return Ok(entry);
    }

    let mut matches: Vec<JournalEntry> = pipeline
        .list_entries()
        .await?
        .into_iter()
        .filter(|e| e.id.as_str().starts_with(entry_id))
        .collect();

    match matches.len() {
        0 => anyhow::bail!("Entry not found: {}", entry_id),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("Entry ID prefix {} is ambiguous ({} matches)", entry_id, n),
    }
}

/// Wait for Ctrl-C, or for `duration` seconds if given
async fn stop_signal(duration: Option<u64>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => ctrl_c.await,
    }
}

/// Record until stopped, then save the entry
async fn record_entry(
    title: String,
    mood: Option<String>,
    note: Option<String>,
    duration: Option<u64>,
    device: Option<DeviceKind>,
) -> Result<()> {
    let mut draft = EntryDraft::new(title);
    if let Some(mood) = mood {
        draft = draft.with_mood(mood);
    }
    if let Some(note) = note {
        draft = draft.with_note(note);
    }
    // Reject a blank title before opening any device or store
    draft.validate()?;

    let mut pipeline = build_pipeline(device).await?;

    eprintln!("Recording from {}", pipeline.recorder().device_name());
    match duration {
        Some(secs) => eprintln!("   Stops after {}s or on Ctrl-C", secs),
        None => eprintln!("   Press Ctrl-C to stop"),
    }

    let saved = pipeline.capture_and_save(draft, stop_signal(duration)).await;

    for warning in pipeline.recorder().warnings() {
        eprintln!("warning: encoder reported: {}", warning);
    }

    match saved {
        Ok(saved) => {
            println!("Saved entry {}", saved.id);
            println!("  Object:      {}", saved.object_path);
            println!("  Locator:     {}", saved.locator);
            println!("  Type:        {}", saved.artifact.mime_type);
            println!("  Size:        {} bytes", saved.artifact.size_bytes);
            println!("  Fingerprint: {}", saved.artifact.fingerprint);
            Ok(())
        }
        Err(e) => {
            if let Some(locator) = e.orphaned_locator() {
                eprintln!("warning: uploaded recording is not referenced by any entry: {}", locator);
            }
            Err(e.into())
        }
    }
}

/// List entries, optionally filtered
async fn list_entries(search: Option<&str>, limit: usize) -> Result<()> {
    let pipeline = build_pipeline(None).await?;

    let entries = match search {
        Some(query) => pipeline.search_entries(query).await?,
        None => pipeline.list_entries().await?,
    };

    if entries.is_empty() {
        println!("No entries found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<12} {:<30}", "ENTRY ID", "CREATED", "MOOD", "TITLE");
    println!("{}", "-".repeat(100));

    for entry in entries.iter().take(limit) {
        println!(
            "{:<38} {:<20} {:<12} {:<30}",
            entry.id.as_str(),
            entry.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.mood,
            entry.title
        );
    }

    if entries.len() > limit {
        println!("\n... and {} more", entries.len() - limit);
    }

    Ok(())
}

/// Show one entry
async fn show_entry(entry_id: &str) -> Result<()> {
    let pipeline = build_pipeline(None).await?;
    let entry = find_entry(&pipeline, entry_id).await?;

    println!("  ID:      {}", entry.id);
    println!("  Title:   {}", entry.title);
    println!("  Mood:    {}", entry.mood);
    if let Some(note) = &entry.note {
        println!("  Note:    {}", note);
    }
    println!("  Created: {}", entry.created_at);
    println!("  Locator: {}", entry.artifact_locator);

    match pipeline.download_reference(&entry).await {
        Ok(url) => println!("  Download: {}", url),
        Err(PipelineError::Download(e)) if e.is_not_found() => {
            println!("  Download: (recording missing from store)")
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Delete one entry and its recording
async fn delete_entry(entry_id: &str) -> Result<()> {
    let pipeline = build_pipeline(None).await?;
    let entry = find_entry(&pipeline, entry_id).await?;

    match pipeline.delete(&entry.id, &entry.artifact_locator).await {
        Ok(()) => {
            println!("Deleted entry {} ({})", entry.id, entry.title);
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            println!("Deleted entry {} ({})", entry.id, entry.title);
            eprintln!("warning: {}", e);
            if let Some(locator) = e.orphaned_locator() {
                eprintln!("   Recording left in storage: {}", locator);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// List orphaned objects reported in the ledger
async fn list_orphans() -> Result<()> {
    let cfg = config::config()?;
    let ledger = EventLedger::open(&cfg.ledger_path).await?;
    let orphans = ledger.orphans().await?;

    if orphans.is_empty() {
        println!("No orphaned recordings reported");
        return Ok(());
    }

    println!("{:<20} {:<38} {:<60}", "REPORTED", "ENTRY ID", "LOCATOR");
    println!("{}", "-".repeat(120));

    for event in orphans {
        println!(
            "{:<20} {:<38} {:<60}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            event.entry_id.as_ref().map(EntryId::as_str).unwrap_or("-"),
            event.locator.as_ref().map(|l| l.as_str()).unwrap_or("-")
        );
        if let Some(error) = &event.error {
            println!("    {}", error);
        }
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("vidjournal configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Objects: {}", cfg.objects_dir.display());
    println!("  Index:   {}", cfg.index_path.display());
    println!("  Ledger:  {}", cfg.ledger_path.display());
    println!();

    let capture = &cfg.capture;
    let video = &capture.recorder.constraints.video;
    println!("Capture:");
    println!("  Device:        {:?}", capture.device);
    println!("  Program:       {}", capture.command.program);
    println!("  Video device:  {}", capture.command.video_device.display());
    println!(
        "  Audio device:  {}",
        capture.command.audio_device.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Constraints:   {}x{} {:?}, audio {}",
        video.ideal_width, video.ideal_height, video.facing_mode, capture.recorder.constraints.audio
    );
    println!("  Drain timeout: {}ms", capture.recorder.drain_timeout.as_millis());
    println!("  Encodings:");
    for mime in capture.recorder.ladder.candidates() {
        println!("    {}", mime);
    }
    println!("  Default:       {}", capture.command.default_encoding.mime_type);
    println!();

    let storage = &cfg.storage;
    println!("Storage:");
    println!("  Backend:       {:?}", storage.backend);
    if let Some(endpoint) = &storage.endpoint {
        println!("  Endpoint:      {}", endpoint);
    }
    if let Some(bucket) = &storage.bucket {
        println!("  Bucket:        {}", bucket);
    }
    println!("  Object prefix: {}", storage.object_prefix);
    println!(
        "  Auth token:    {}",
        if storage.auth_token.is_some() { "(set)" } else { "(none)" }
    );

    Ok(())
}
