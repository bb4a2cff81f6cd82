//! Recorder: drives one recording attempt at a time over a capture device.
//!
//! All phase changes go through [`next_phase`]; this type only performs the
//! side effects (acquire, encoder start, drain, release) that go with them.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    next_phase, Artifact, ChunkBuffer, RecorderInput, RecordingPhase, Transition,
    DEFAULT_MIME_TYPE,
};

use super::encoding::EncodingLadder;
use super::preview::PreviewHandle;
use super::{
    CaptureConstraints, CaptureError, DeviceCaptureSession, DeviceStream, EncoderEvent,
    EncoderFault, EncoderHandle,
};

/// Recorder settings
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// What to ask the device for
    pub constraints: CaptureConstraints,

    /// Encoding preference, most specific first
    pub ladder: EncodingLadder,

    /// Upper bound on waiting for the encoder to drain after stop
    pub drain_timeout: Duration,

    /// Where preview files go (system temp dir if `None`)
    pub preview_dir: Option<PathBuf>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            constraints: CaptureConstraints::default(),
            ladder: EncodingLadder::default(),
            drain_timeout: Duration::from_secs(10),
            preview_dir: None,
        }
    }
}

/// Recording state machine over a [`DeviceCaptureSession`]
pub struct Recorder {
    device: Arc<dyn DeviceCaptureSession>,
    settings: RecorderSettings,
    phase: RecordingPhase,
    buffer: ChunkBuffer,
    stream: Option<DeviceStream>,
    encoder: Option<EncoderHandle>,
    artifact: Option<Artifact>,
    preview: Option<PreviewHandle>,
    warnings: Vec<String>,
}

impl Recorder {
    pub fn new(device: Arc<dyn DeviceCaptureSession>, settings: RecorderSettings) -> Self {
        Self {
            device,
            settings,
            phase: RecordingPhase::Idle,
            buffer: ChunkBuffer::new(),
            stream: None,
            encoder: None,
            artifact: None,
            preview: None,
            warnings: Vec::new(),
        }
    }

    pub fn phase(&self) -> RecordingPhase {
        self.phase
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// The finalized artifact, if the last attempt finished
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// Segments buffered in the current attempt
    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.total_bytes()
    }

    /// Recoverable encoder problems seen in the current attempt
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// MIME type of the running encoder
    pub fn mime_type(&self) -> Option<&str> {
        self.encoder.as_ref().map(EncoderHandle::mime_type)
    }

    /// Whether a device stream is currently held
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    fn transition(&mut self, input: RecorderInput) -> Transition {
        let transition = next_phase(self.phase, input);
        match transition {
            Transition::To(next) => {
                debug!(from = %self.phase, to = %next, ?input, "Recorder transition");
                self.phase = next;
            }
            Transition::Ignored => debug!(phase = %self.phase, ?input, "Recorder input ignored"),
            Transition::Stay | Transition::Rejected => {}
        }
        transition
    }

    /// Start a new attempt: acquire a stream and start the encoder.
    ///
    /// Rejected unless the recorder is `Idle`. On any failure the recorder is
    /// back in `Idle` with no stream held.
    ///
    /// Cancel safe: if this future is dropped mid-acquire, the next call
    /// releases whatever was held and starts over.
    #[instrument(skip(self), fields(device = %self.device.name()))]
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        // Only a dropped start leaves the recorder here
        if self.phase == RecordingPhase::Requesting {
            warn!("Previous start was interrupted, rolling back");
            self.abandon();
            self.transition(RecorderInput::Reset);
        }

        if self.transition(RecorderInput::Start) == Transition::Rejected {
            warn!(phase = %self.phase, "Start rejected");
            return Err(CaptureError::Busy(self.phase));
        }

        self.buffer.clear();
        self.warnings.clear();

        let stream = match self.device.acquire(&self.settings.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Device acquisition failed");
                self.transition(RecorderInput::AcquireFailed);
                return Err(e);
            }
        };
        let stream = self.stream.insert(stream);

        let device = Arc::clone(&self.device);
        let mime_type = self
            .settings
            .ladder
            .select(|mime| device.is_type_supported(mime))
            .map(str::to_string);

        let encoder = match device.start_encoder(stream, mime_type.as_deref()).await {
            Ok(encoder) => encoder,
            Err(e) => {
                warn!(error = %e, "Encoder failed to start");
                self.release_stream();
                self.transition(RecorderInput::AcquireFailed);
                return Err(e);
            }
        };

        info!(
            stream = %stream.id(),
            mime_type = encoder.mime_type(),
            "Recording started"
        );

        self.encoder = Some(encoder);
        self.transition(RecorderInput::StreamAcquired);
        Ok(())
    }

    /// Accept an emitted segment. Returns whether it was appended.
    ///
    /// Zero-length segments and segments outside an attempt are dropped.
    pub fn on_chunk(&mut self, chunk: Bytes) -> bool {
        match self.transition(RecorderInput::Chunk) {
            Transition::Stay => {
                let appended = self.buffer.push(chunk);
                if !appended {
                    debug!("Dropped empty chunk");
                }
                appended
            }
            _ => false,
        }
    }

    /// Handle an encoder problem.
    ///
    /// Recoverable problems are recorded and recording continues. A fatal
    /// problem while `Active` ends the attempt and is returned.
    pub fn on_encoder_fault(&mut self, fault: EncoderFault) -> Result<(), CaptureError> {
        let input = if fault.fatal {
            RecorderInput::EncoderFailed
        } else {
            RecorderInput::EncoderWarning
        };

        match self.transition(input) {
            Transition::To(RecordingPhase::Idle) => {
                warn!(error = %fault.message, "Encoder failed, abandoning recording");
                self.abandon();
                Err(CaptureError::Encoding(fault.message))
            }
            Transition::Stay => {
                warn!(error = %fault.message, fatal = fault.fatal, "Encoder reported a problem");
                self.warnings.push(fault.message);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn handle_event(&mut self, event: EncoderEvent) -> Result<(), CaptureError> {
        match event {
            EncoderEvent::Chunk(chunk) => {
                self.on_chunk(chunk);
                Ok(())
            }
            EncoderEvent::Fault(fault) => self.on_encoder_fault(fault),
        }
    }

    /// Process every event already queued by the encoder, without waiting.
    ///
    /// Returns the number of events processed.
    pub fn pump(&mut self) -> Result<usize, CaptureError> {
        let mut processed = 0;
        while self.phase == RecordingPhase::Active {
            let Some(event) = self.encoder.as_mut().and_then(EncoderHandle::try_next_event) else {
                break;
            };
            processed += 1;
            self.handle_event(event)?;
        }
        Ok(processed)
    }

    /// Consume encoder events until `stop_trigger` resolves, then stop.
    ///
    /// If the encoder closes on its own (device gone) the attempt is
    /// finalized with what was captured.
    pub async fn record_until<F>(&mut self, stop_trigger: F) -> Result<Artifact, CaptureError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop_trigger);

        loop {
            if self.phase != RecordingPhase::Active {
                return Err(CaptureError::Encoding(format!(
                    "recorder is {}, not recording",
                    self.phase
                )));
            }

            let next = {
                let Some(encoder) = self.encoder.as_mut() else {
                    break;
                };
                tokio::select! {
                    biased;
                    _ = &mut stop_trigger => None,
                    event = encoder.next_event() => Some(event),
                }
            };

            match next {
                None => break,
                Some(Some(event)) => self.handle_event(event)?,
                Some(None) => {
                    warn!("Encoder closed before stop was requested");
                    break;
                }
            }
        }

        self.stop()
            .await
            .ok_or_else(|| CaptureError::Encoding("recording ended without an artifact".to_string()))
    }

    /// Stop the attempt: drain the encoder, finalize the artifact, release the stream.
    ///
    /// A no-op returning `None` unless the recorder is `Active`.
    ///
    /// Cancel safe: if this future is dropped mid-drain, the recorder stays
    /// `Stopping` with its buffer intact and the next call finishes the stop.
    #[instrument(skip(self), fields(device = %self.device.name()))]
    pub async fn stop(&mut self) -> Option<Artifact> {
        match self.transition(RecorderInput::Stop) {
            Transition::To(RecordingPhase::Stopping) => {}
            Transition::Ignored if self.phase == RecordingPhase::Stopping => {
                warn!("Resuming interrupted stop");
            }
            _ => return None,
        }

        let mime_type = self
            .encoder
            .as_ref()
            .map(|e| e.mime_type().to_string())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        if let Some(encoder) = self.encoder.as_mut() {
            encoder.request_stop();
        }
        self.drain().await;
        self.encoder = None;

        let artifact = self.buffer.finalize(mime_type);
        self.release_stream();
        self.release_preview();

        self.transition(RecorderInput::DrainComplete);
        info!(
            size_bytes = artifact.len(),
            mime_type = artifact.mime_type(),
            warnings = self.warnings.len(),
            "Recording finalized"
        );

        self.artifact = Some(artifact.clone());
        Some(artifact)
    }

    async fn drain(&mut self) {
        let deadline = tokio::time::Instant::now() + self.settings.drain_timeout;

        loop {
            let Some(encoder) = self.encoder.as_mut() else {
                break;
            };
            let next = tokio::time::timeout_at(deadline, encoder.next_event()).await;
            match next {
                Ok(Some(event)) => {
                    // Fatal faults during drain do not end the attempt
                    if let Err(e) = self.handle_event(event) {
                        warn!(error = %e, "Encoder error while draining");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        timeout_ms = self.settings.drain_timeout.as_millis() as u64,
                        "Encoder drain timed out, finalizing with captured data"
                    );
                    break;
                }
            }
        }
    }

    /// Create (or return) the preview for the finalized artifact
    pub fn preview(&mut self) -> std::io::Result<Option<&PreviewHandle>> {
        let Some(artifact) = self.artifact.as_ref() else {
            return Ok(None);
        };

        let fingerprint = artifact.fingerprint();
        let current = self
            .preview
            .as_ref()
            .map(|p| p.fingerprint() == fingerprint && !p.is_released())
            .unwrap_or(false);

        if !current {
            let fresh = PreviewHandle::create(artifact, self.settings.preview_dir.as_deref())?;
            self.release_preview();
            self.preview = Some(fresh);
        }

        Ok(self.preview.as_ref())
    }

    /// Discard the current attempt (buffer, artifact, preview, stream) and return to `Idle`.
    pub fn reset(&mut self) {
        self.abandon();
        self.artifact = None;
        self.release_preview();
        self.transition(RecorderInput::Reset);
    }

    fn abandon(&mut self) {
        // Dropping the handle closes the stop channel, which stops the producer
        self.encoder = None;
        self.buffer.clear();
        self.release_stream();
    }

    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let stopped = self.device.release(&mut stream);
            debug!(stream = %stream.id(), stopped, "Device stream released");
        }
    }

    fn release_preview(&mut self) {
        if let Some(mut preview) = self.preview.take() {
            if let Err(e) = preview.release() {
                warn!(path = %preview.path().display(), error = %e, "Failed to remove preview");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.abandon();
        self.release_preview();
    }
}
