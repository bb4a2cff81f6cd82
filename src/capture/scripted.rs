//! Scripted capture device.
//!
//! Plays a fixed sequence of encoder events instead of reading hardware.
//! Used by the test suites and by `vidjournal record --device scripted` for
//! exercising the pipeline on machines without a camera.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{
    CaptureConstraints, CaptureError, DeviceCaptureSession, DeviceStream, EncoderHandle,
    EncoderSink, Track, TrackKind, ENCODER_CHANNEL_CAPACITY, FALLBACK_MIME_TYPE,
};

/// One scripted encoder event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Chunk(Bytes),
    Fault { message: String, fatal: bool },
}

impl ScriptStep {
    pub fn chunk(data: &'static [u8]) -> Self {
        Self::Chunk(Bytes::from_static(data))
    }

    pub fn fault(message: impl Into<String>, fatal: bool) -> Self {
        Self::Fault {
            message: message.into(),
            fatal,
        }
    }
}

/// Capture device that replays a script
pub struct ScriptedDevice {
    name: String,
    script: Vec<ScriptStep>,
    tail: Vec<ScriptStep>,
    supported: Option<Vec<String>>,
    default_mime: String,
    acquire_error: Option<CaptureError>,
    encoder_error: Option<CaptureError>,
    close_early: bool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    requested: Mutex<Vec<Option<String>>>,
}

impl ScriptedDevice {
    /// Device that emits `script` once recording starts and closes after stop
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            name: "scripted".to_string(),
            script,
            tail: Vec::new(),
            supported: None,
            default_mime: FALLBACK_MIME_TYPE.to_string(),
            acquire_error: None,
            encoder_error: None,
            close_early: false,
            acquisitions: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Events emitted after the stop request, before the channel closes
    pub fn with_tail(mut self, tail: Vec<ScriptStep>) -> Self {
        self.tail = tail;
        self
    }

    /// Restrict supported MIME types (everything is supported by default)
    pub fn with_supported_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.supported = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Format used when the recorder lets the device choose
    pub fn with_default_mime(mut self, mime_type: impl Into<String>) -> Self {
        self.default_mime = mime_type.into();
        self
    }

    /// Fail every acquisition with `error`
    pub fn failing_acquire(mut self, error: CaptureError) -> Self {
        self.acquire_error = Some(error);
        self
    }

    /// Fail every encoder start with `error`
    pub fn failing_encoder(mut self, error: CaptureError) -> Self {
        self.encoder_error = Some(error);
        self
    }

    /// Close the channel right after the script, as if the device went away
    pub fn closing_early(mut self) -> Self {
        self.close_early = true;
        self
    }

    /// Number of acquisition attempts
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of stream releases
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// MIME type requested on each encoder start (`None` = device default)
    pub fn requested_mime_types(&self) -> Vec<Option<String>> {
        self.requested
            .lock()
            .map(|requested| requested.clone())
            .unwrap_or_default()
    }
}

async fn play(sink: &EncoderSink, steps: Vec<ScriptStep>) -> bool {
    for step in steps {
        let sent = match step {
            ScriptStep::Chunk(chunk) => sink.emit(chunk).await,
            ScriptStep::Fault { message, fatal } => sink.fault(message, fatal).await,
        };
        if sent.is_err() {
            return false;
        }
    }
    true
}

#[async_trait]
impl DeviceCaptureSession for ScriptedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceStream, CaptureError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = &self.acquire_error {
            return Err(err.clone());
        }

        let mut tracks = vec![Track::new(TrackKind::Video, "scripted-video")];
        if constraints.audio {
            tracks.push(Track::new(TrackKind::Audio, "scripted-audio"));
        }
        Ok(DeviceStream::new(constraints.clone(), tracks))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &self.supported {
            Some(types) => types.iter().any(|t| t == mime_type),
            None => true,
        }
    }

    async fn start_encoder(
        &self,
        _stream: &DeviceStream,
        mime_type: Option<&str>,
    ) -> Result<EncoderHandle, CaptureError> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(mime_type.map(str::to_string));
        }

        if let Some(err) = &self.encoder_error {
            return Err(err.clone());
        }

        let mime_type = mime_type.unwrap_or(&self.default_mime);
        let (handle, mut sink) = EncoderHandle::channel(mime_type, ENCODER_CHANNEL_CAPACITY);

        let script = self.script.clone();
        let tail = self.tail.clone();
        let close_early = self.close_early;

        tokio::spawn(async move {
            if !play(&sink, script).await || close_early {
                return;
            }
            sink.stop_requested().await;
            play(&sink, tail).await;
        });

        Ok(handle)
    }

    fn release(&self, stream: &mut DeviceStream) -> usize {
        self.releases.fetch_add(1, Ordering::SeqCst);
        stream.stop_all_tracks()
    }
}
