//! Device capture and recording.
//!
//! A [`DeviceCaptureSession`] hands out live [`DeviceStream`]s and starts
//! encoders on them. An encoder is a producer task that pushes
//! [`EncoderEvent`]s into a bounded channel; the [`Recorder`] consumes that
//! channel strictly in order.
//!
//! ```text
//! DeviceCaptureSession ──acquire──▶ DeviceStream
//!          │
//!          └─start_encoder──▶ EncoderSink ══mpsc══▶ EncoderHandle ──▶ Recorder ──▶ Artifact
//!                                  ▲                      │
//!                                  └──────oneshot stop────┘
//! ```
//!
//! Stop is a oneshot signal to the producer; the producer drains whatever it
//! still holds and drops its sink, which closes the channel. The recorder
//! treats the closed channel as "drain complete".

pub mod command;
pub mod encoding;
pub mod preview;
pub mod recorder;
pub mod scripted;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::RecordingPhase;

pub use command::{CommandDevice, CommandDeviceSettings, EncodingProfile};
pub use encoding::{EncodingLadder, FALLBACK_MIME_TYPE, PREFERRED_MIME_TYPE};
pub use preview::PreviewHandle;
pub use recorder::{Recorder, RecorderSettings};
pub use scripted::{ScriptStep, ScriptedDevice};

/// Capacity of the encoder → recorder channel
pub const ENCODER_CHANNEL_CAPACITY: usize = 64;

/// Errors raised while acquiring a device or recording from it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("permission to use the capture device was denied: {0}")]
    PermissionDenied(String),

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("recorder is busy ({0}); stop or reset it before starting again")]
    Busy(RecordingPhase),
}

/// Which camera to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

impl Default for FacingMode {
    fn default() -> Self {
        Self::User
    }
}

/// Requested video properties; devices treat them as ideals, not requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    #[serde(default = "default_width")]
    pub ideal_width: u32,
    #[serde(default = "default_height")]
    pub ideal_height: u32,
    #[serde(default)]
    pub facing_mode: FacingMode,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: default_width(),
            ideal_height: default_height(),
            facing_mode: FacingMode::default(),
        }
    }
}

/// What to ask the device for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    #[serde(default)]
    pub video: VideoConstraints,
    #[serde(default = "default_audio")]
    pub audio: bool,
}

fn default_audio() -> bool {
    true
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: VideoConstraints::default(),
            audio: default_audio(),
        }
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

/// One constituent track of a device stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    kind: TrackKind,
    label: String,
    live: bool,
}

impl Track {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            live: true,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Device the track reads from (device node, audio source name, ...)
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Stop the track. Returns whether it was still live.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.live, false)
    }
}

/// A live capture stream
///
/// Owned by exactly one holder while active. Release it through
/// [`DeviceCaptureSession::release`]; a stream dropped while still live
/// stops its tracks and logs a warning.
#[derive(Debug)]
pub struct DeviceStream {
    id: Uuid,
    constraints: CaptureConstraints,
    tracks: Vec<Track>,
}

impl DeviceStream {
    pub fn new(constraints: CaptureConstraints, tracks: Vec<Track>) -> Self {
        Self {
            id: Uuid::new_v4(),
            constraints,
            tracks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// First track of the given kind
    pub fn track(&self, kind: TrackKind) -> Option<&Track> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Whether any track is still live
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(Track::is_live)
    }

    /// Stop every live track. Idempotent: returns how many were stopped by this call.
    pub fn stop_all_tracks(&mut self) -> usize {
        self.tracks.iter_mut().map(Track::stop).filter(|was_live| *was_live).count()
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        let stopped = self.stop_all_tracks();
        if stopped > 0 {
            tracing::warn!(stream = %self.id, stopped, "Device stream dropped without release");
        }
    }
}

/// A problem reported by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderFault {
    pub message: String,
    /// The encoder cannot continue
    pub fatal: bool,
}

/// Messages from an encoder to the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// An encoded segment, in emission order
    Chunk(Bytes),

    /// A recoverable or fatal encoder problem
    Fault(EncoderFault),
}

/// Recorder side of an encoder
#[derive(Debug)]
pub struct EncoderHandle {
    mime_type: String,
    events: mpsc::Receiver<EncoderEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl EncoderHandle {
    /// Create a connected handle/sink pair
    pub fn channel(mime_type: impl Into<String>, capacity: usize) -> (Self, EncoderSink) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = Self {
            mime_type: mime_type.into(),
            events: events_rx,
            stop_tx: Some(stop_tx),
        };
        let sink = EncoderSink {
            events: events_tx,
            stop_rx,
            stop_seen: false,
        };

        (handle, sink)
    }

    /// Container/codec the encoder is producing
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Ask the producer to drain and close. Only the first call has an effect.
    pub fn request_stop(&mut self) -> bool {
        match self.stop_tx.take() {
            Some(tx) => {
                // The producer may already be gone; its channel is closed then
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Next event, or `None` once the producer has closed the channel
    pub async fn next_event(&mut self) -> Option<EncoderEvent> {
        self.events.recv().await
    }

    /// Next already-queued event without waiting
    pub fn try_next_event(&mut self) -> Option<EncoderEvent> {
        self.events.try_recv().ok()
    }
}

/// Producer side of an encoder
#[derive(Debug)]
pub struct EncoderSink {
    events: mpsc::Sender<EncoderEvent>,
    stop_rx: oneshot::Receiver<()>,
    stop_seen: bool,
}

impl EncoderSink {
    /// Emit a segment. Fails once the recorder has gone away.
    pub async fn emit(&self, chunk: Bytes) -> Result<(), EncoderClosed> {
        self.events
            .send(EncoderEvent::Chunk(chunk))
            .await
            .map_err(|_| EncoderClosed)
    }

    /// Report a problem
    pub async fn fault(&self, message: impl Into<String>, fatal: bool) -> Result<(), EncoderClosed> {
        self.events
            .send(EncoderEvent::Fault(EncoderFault {
                message: message.into(),
                fatal,
            }))
            .await
            .map_err(|_| EncoderClosed)
    }

    /// Resolves when the recorder requests a stop or goes away.
    ///
    /// Cancel safe; once it has resolved it resolves immediately again.
    pub async fn stop_requested(&mut self) {
        if self.stop_seen {
            return;
        }
        let _ = (&mut self.stop_rx).await;
        self.stop_seen = true;
    }

    /// Resolves once the recorder has dropped its handle
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let events = self.events.clone();
        async move { events.closed().await }
    }

    pub fn is_stop_requested(&mut self) -> bool {
        if !self.stop_seen {
            self.stop_seen = !matches!(
                self.stop_rx.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            );
        }
        self.stop_seen
    }
}

/// The recorder dropped its end of the encoder channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("encoder channel closed")]
pub struct EncoderClosed;

/// A source of live capture streams
#[async_trait]
pub trait DeviceCaptureSession: Send + Sync {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Acquire a live stream matching `constraints` as closely as possible
    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceStream, CaptureError>;

    /// Whether the encoder can produce `mime_type`
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start encoding `stream`. `None` lets the device pick its default format.
    async fn start_encoder(
        &self,
        stream: &DeviceStream,
        mime_type: Option<&str>,
    ) -> Result<EncoderHandle, CaptureError>;

    /// Stop every track of `stream`. Idempotent; returns tracks stopped by this call.
    fn release(&self, stream: &mut DeviceStream) -> usize {
        stream.stop_all_tracks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> DeviceStream {
        DeviceStream::new(
            CaptureConstraints::default(),
            vec![
                Track::new(TrackKind::Video, "/dev/video0"),
                Track::new(TrackKind::Audio, "default"),
            ],
        )
    }

    #[test]
    fn test_default_constraints() {
        let constraints = CaptureConstraints::default();
        assert_eq!(constraints.video.ideal_width, 640);
        assert_eq!(constraints.video.ideal_height, 480);
        assert_eq!(constraints.video.facing_mode, FacingMode::User);
        assert!(constraints.audio);
    }

    #[test]
    fn test_stop_all_tracks_is_idempotent() {
        let mut stream = stream();
        assert!(stream.is_live());

        assert_eq!(stream.stop_all_tracks(), 2);
        assert_eq!(stream.stop_all_tracks(), 0);
        assert!(!stream.is_live());
        assert!(stream.tracks().iter().all(|t| !t.is_live()));
    }

    #[test]
    fn test_track_lookup() {
        let stream = stream();
        assert_eq!(stream.track(TrackKind::Audio).unwrap().label(), "default");
        assert_eq!(stream.track(TrackKind::Video).unwrap().label(), "/dev/video0");
    }

    #[tokio::test]
    async fn test_encoder_channel_closes_after_sink_drop() {
        let (mut handle, mut sink) = EncoderHandle::channel("video/webm", 4);

        sink.emit(Bytes::from_static(b"abc")).await.unwrap();
        assert!(!sink.is_stop_requested());

        assert!(handle.request_stop());
        assert!(!handle.request_stop());
        sink.stop_requested().await;
        assert!(sink.is_stop_requested());
        drop(sink);

        assert_eq!(
            handle.next_event().await,
            Some(EncoderEvent::Chunk(Bytes::from_static(b"abc")))
        );
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_sink_sees_dropped_handle() {
        let (handle, mut sink) = EncoderHandle::channel("video/webm", 4);
        drop(handle);

        sink.stop_requested().await;
        assert!(sink.emit(Bytes::from_static(b"late")).await.is_err());
    }
}
