//! Capture device backed by an external capture program.
//!
//! The program (ffmpeg or anything with a compatible command line) reads a
//! video device node and an audio source and writes the encoded container to
//! stdout. Writing `q` to its stdin asks it to flush and exit.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::{
    CaptureConstraints, CaptureError, DeviceCaptureSession, DeviceStream, EncoderHandle,
    EncoderSink, Track, TrackKind, ENCODER_CHANNEL_CAPACITY, FALLBACK_MIME_TYPE,
    PREFERRED_MIME_TYPE,
};

/// Program arguments that make the capture program produce one MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub mime_type: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl EncodingProfile {
    pub fn new(mime_type: impl Into<String>, args: &[&str]) -> Self {
        Self {
            mime_type: mime_type.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Settings for [`CommandDevice`]
#[derive(Debug, Clone)]
pub struct CommandDeviceSettings {
    /// Capture program (looked up on PATH)
    pub program: String,

    /// Video device node
    pub video_device: PathBuf,

    /// Input format for the video device
    pub video_format: String,

    /// Audio source; no audio track when `None`
    pub audio_device: Option<String>,

    /// Input format for the audio source
    pub audio_format: String,

    /// Supported output formats
    pub encodings: Vec<EncodingProfile>,

    /// Output format when the recorder lets the device choose
    pub default_encoding: EncodingProfile,

    /// Size of the segments read from the program's stdout
    pub chunk_bytes: usize,
}

impl Default for CommandDeviceSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            video_device: PathBuf::from("/dev/video0"),
            video_format: "v4l2".to_string(),
            audio_device: Some("default".to_string()),
            audio_format: "pulse".to_string(),
            encodings: vec![
                EncodingProfile::new(
                    PREFERRED_MIME_TYPE,
                    &["-c:v", "libvpx", "-deadline", "realtime", "-c:a", "libopus", "-f", "webm"],
                ),
                EncodingProfile::new(FALLBACK_MIME_TYPE, &["-f", "webm"]),
            ],
            default_encoding: EncodingProfile::new(FALLBACK_MIME_TYPE, &["-f", "webm"]),
            chunk_bytes: 64 * 1024,
        }
    }
}

/// Capture device driving an external capture program
pub struct CommandDevice {
    settings: CommandDeviceSettings,
}

impl Default for CommandDevice {
    fn default() -> Self {
        Self::new(CommandDeviceSettings::default())
    }
}

impl CommandDevice {
    pub fn new(settings: CommandDeviceSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CommandDeviceSettings {
        &self.settings
    }

    fn profile(&self, mime_type: Option<&str>) -> &EncodingProfile {
        mime_type
            .and_then(|mime| self.settings.encodings.iter().find(|p| p.mime_type == mime))
            .unwrap_or(&self.settings.default_encoding)
    }

    /// Full argument list for recording `stream` with `profile`
    ///
    /// Facing mode has no meaning for a device node and is not passed on.
    pub fn build_args(&self, stream: &DeviceStream, profile: &EncodingProfile) -> Vec<String> {
        let video = &stream.constraints().video;
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            self.settings.video_format.clone(),
            "-video_size".into(),
            format!("{}x{}", video.ideal_width, video.ideal_height),
            "-i".into(),
        ];

        match stream.track(TrackKind::Video) {
            Some(track) => args.push(track.label().to_string()),
            None => args.push(self.settings.video_device.display().to_string()),
        }

        if let Some(audio) = stream.track(TrackKind::Audio) {
            args.extend([
                "-f".to_string(),
                self.settings.audio_format.clone(),
                "-i".to_string(),
                audio.label().to_string(),
            ]);
        }

        args.extend(profile.args.iter().cloned());
        args.push("pipe:1".into());
        args
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> CaptureError {
    match e.kind() {
        ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("cannot execute '{}': {}", program, e))
        }
        ErrorKind::NotFound => {
            CaptureError::DeviceUnavailable(format!("capture program '{}' not found", program))
        }
        _ => CaptureError::DeviceUnavailable(format!("failed to start '{}': {}", program, e)),
    }
}

#[async_trait]
impl DeviceCaptureSession for CommandDevice {
    fn name(&self) -> &str {
        &self.settings.program
    }

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<DeviceStream, CaptureError> {
        let node = &self.settings.video_device;

        // Opening the node is enough to tell missing from forbidden
        tokio::fs::File::open(node).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => CaptureError::PermissionDenied(format!(
                "cannot open {}: {}",
                node.display(),
                e
            )),
            _ => CaptureError::DeviceUnavailable(format!("cannot open {}: {}", node.display(), e)),
        })?;

        let mut tracks = vec![Track::new(TrackKind::Video, node.display().to_string())];
        if constraints.audio {
            if let Some(audio) = &self.settings.audio_device {
                tracks.push(Track::new(TrackKind::Audio, audio.clone()));
            }
        }

        Ok(DeviceStream::new(constraints.clone(), tracks))
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.settings.encodings.iter().any(|p| p.mime_type == mime_type)
    }

    async fn start_encoder(
        &self,
        stream: &DeviceStream,
        mime_type: Option<&str>,
    ) -> Result<EncoderHandle, CaptureError> {
        let profile = self.profile(mime_type);
        let args = self.build_args(stream, profile);
        debug!(program = %self.settings.program, ?args, "Starting capture program");

        let mut child = Command::new(&self.settings.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.settings.program, e))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(CaptureError::DeviceUnavailable(
                "capture program output is not piped".to_string(),
            ));
        };
        let stdin = child.stdin.take();

        let (handle, sink) = EncoderHandle::channel(&profile.mime_type, ENCODER_CHANNEL_CAPACITY);
        tokio::spawn(run_encoder(
            child,
            stdin,
            stdout,
            stderr,
            sink,
            self.settings.chunk_bytes.max(1),
        ));

        Ok(handle)
    }
}

/// Pump the program's output into `sink` until it exits
async fn run_encoder(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    mut sink: EncoderSink,
    chunk_bytes: usize,
) {
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stderr_open = true;
    let mut stop_sent = false;
    let mut buf = BytesMut::with_capacity(chunk_bytes);
    let abandoned = sink.closed();
    tokio::pin!(abandoned);

    loop {
        tokio::select! {
            // Recorder gave up (drain timeout or reset); dropping the child kills it
            _ = &mut abandoned => return,
            read = stdout.read_buf(&mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if buf.len() >= chunk_bytes {
                        if sink.emit(buf.split().freeze()).await.is_err() {
                            return;
                        }
                        buf.reserve(chunk_bytes);
                    }
                }
                Err(e) => {
                    let _ = sink.fault(format!("reading capture output: {}", e), true).await;
                    return;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    if !forward_stderr(&sink, &line).await {
                        return;
                    }
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
            _ = sink.stop_requested(), if !stop_sent => {
                stop_sent = true;
                // Dropping stdin after `q` also signals end of input
                if let Some(mut pipe) = stdin.take() {
                    if let Err(e) = pipe.write_all(b"q").await {
                        warn!(error = %e, "Failed to ask capture program to stop, killing it");
                        let _ = child.start_kill();
                    }
                }
            }
        }
    }

    if !buf.is_empty() && sink.emit(buf.freeze()).await.is_err() {
        return;
    }

    // Diagnostics written after stdout closed are still part of this attempt
    while stderr_open {
        tokio::select! {
            _ = &mut abandoned => return,
            line = stderr_lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !forward_stderr(&sink, &line).await {
                        return;
                    }
                }
                Ok(None) | Err(_) => stderr_open = false,
            },
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            debug!("Capture program exited");
        }
        Ok(status) => {
            let message = format!("capture program exited with {}", status);
            let fatal = !sink.is_stop_requested();
            let _ = sink.fault(message, fatal).await;
        }
        Err(e) => {
            let _ = sink.fault(format!("waiting for capture program: {}", e), false).await;
        }
    }
    // Dropping the sink closes the channel: drain complete
}

/// Report one stderr line as a recoverable fault. `false` once the recorder is gone.
async fn forward_stderr(sink: &EncoderSink, line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || sink.fault(line, false).await.is_ok()
}
