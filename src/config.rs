//! Configuration for vidjournal.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (VIDJOURNAL_HOME, VIDJOURNAL_STORAGE_TOKEN)
//! 2. Config file (.vidjournal/config.yaml)
//! 3. Defaults (~/.vidjournal)
//!
//! Config file discovery:
//! - Searches current directory and parents for .vidjournal/config.yaml
//! - `paths.home` is relative to the .vidjournal/ directory, other paths to
//!   the project root (the directory containing .vidjournal/)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::capture::{
    CaptureConstraints, CommandDeviceSettings, EncodingLadder, EncodingProfile, FacingMode,
    RecorderSettings,
};
use crate::core::DEFAULT_OBJECT_PREFIX;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "VIDJOURNAL_HOME";
pub const ENV_STORAGE_TOKEN: &str = "VIDJOURNAL_STORAGE_TOKEN";

const CONFIG_DIR: &str = ".vidjournal";
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 10_000;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub capture: Option<CaptureConfig>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .vidjournal/)
    pub home: Option<String>,
    /// Object directory for the fs backend (relative to project root)
    pub objects: Option<String>,
    /// SQLite index file (relative to project root)
    pub index: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    pub device: Option<DeviceKind>,
    pub program: Option<String>,
    pub video_device: Option<String>,
    pub video_format: Option<String>,
    /// Empty string disables audio capture
    pub audio_device: Option<String>,
    pub audio_format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub facing_mode: Option<FacingMode>,
    pub audio: Option<bool>,
    pub chunk_bytes: Option<usize>,
    pub drain_timeout_ms: Option<u64>,
    /// Output formats, most preferred first
    pub encodings: Option<Vec<EncodingProfile>>,
    /// Format used when none of `encodings` is supported
    pub default_encoding: Option<EncodingProfile>,
    pub preview_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub backend: Option<StorageBackend>,
    /// Object API endpoint (http backend)
    pub endpoint: Option<String>,
    /// Bucket name (http backend)
    pub bucket: Option<String>,
    pub object_prefix: Option<String>,
}

/// Where recordings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// External capture program
    #[default]
    Command,
    /// Built-in test pattern, no hardware needed
    Scripted,
}

/// Where recordings are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Local directory
    #[default]
    Fs,
    /// Remote object storage API
    Http,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Object directory (fs backend)
    pub objects_dir: PathBuf,
    /// SQLite index file
    pub index_path: PathBuf,
    /// Event ledger file
    pub ledger_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub capture: CaptureSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: DeviceKind,
    pub command: CommandDeviceSettings,
    pub recorder: RecorderSettings,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub endpoint: Option<Url>,
    pub bucket: Option<String>,
    pub object_prefix: String,
    pub auth_token: Option<String>,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's location
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve_capture(capture: CaptureConfig, base_dir: &Path) -> CaptureSettings {
    let defaults = CommandDeviceSettings::default();

    let audio_device = match capture.audio_device {
        Some(device) if device.trim().is_empty() => None,
        Some(device) => Some(device),
        None => defaults.audio_device,
    };

    let encodings = capture.encodings.unwrap_or(defaults.encodings);
    let ladder = EncodingLadder::new(encodings.iter().map(|p| p.mime_type.clone()));

    let command = CommandDeviceSettings {
        program: capture.program.unwrap_or(defaults.program),
        video_device: capture
            .video_device
            .map(PathBuf::from)
            .unwrap_or(defaults.video_device),
        video_format: capture.video_format.unwrap_or(defaults.video_format),
        audio_device,
        audio_format: capture.audio_format.unwrap_or(defaults.audio_format),
        encodings,
        default_encoding: capture.default_encoding.unwrap_or(defaults.default_encoding),
        chunk_bytes: capture.chunk_bytes.unwrap_or(defaults.chunk_bytes),
    };

    let mut constraints = CaptureConstraints::default();
    if let Some(width) = capture.width {
        constraints.video.ideal_width = width;
    }
    if let Some(height) = capture.height {
        constraints.video.ideal_height = height;
    }
    if let Some(facing_mode) = capture.facing_mode {
        constraints.video.facing_mode = facing_mode;
    }
    if let Some(audio) = capture.audio {
        constraints.audio = audio;
    }

    let recorder = RecorderSettings {
        constraints,
        ladder,
        drain_timeout: Duration::from_millis(
            capture.drain_timeout_ms.unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS),
        ),
        preview_dir: capture.preview_dir.map(|dir| resolve_path(base_dir, &dir)),
    };

    CaptureSettings {
        device: capture.device.unwrap_or_default(),
        command,
        recorder,
    }
}

fn resolve_storage(storage: StorageConfig, auth_token: Option<String>) -> Result<StorageSettings> {
    let endpoint = storage
        .endpoint
        .map(|raw| Url::parse(&raw).with_context(|| format!("Invalid storage endpoint: {}", raw)))
        .transpose()?;

    let backend = storage.backend.unwrap_or_default();
    if backend == StorageBackend::Http && (endpoint.is_none() || storage.bucket.is_none()) {
        anyhow::bail!("storage.backend is http but storage.endpoint or storage.bucket is missing");
    }

    Ok(StorageSettings {
        backend,
        endpoint,
        bucket: storage.bucket,
        object_prefix: storage
            .object_prefix
            .unwrap_or_else(|| DEFAULT_OBJECT_PREFIX.to_string()),
        auth_token,
    })
}

/// Build the resolved configuration from an optional config file.
///
/// `env_home` and `env_token` are the values of the environment overrides.
fn resolve_config(
    config_path: Option<&Path>,
    config: ConfigFile,
    default_home: PathBuf,
    env_home: Option<String>,
    env_token: Option<String>,
) -> Result<ResolvedConfig> {
    // .vidjournal/ and the project root containing it
    let config_dir = config_path.and_then(Path::parent);
    let base_dir = config_dir.and_then(Path::parent);

    let home = match (env_home, config.paths.home.as_deref(), config_dir) {
        (Some(env_home), _, _) => PathBuf::from(env_home),
        (None, Some(home), Some(dir)) => resolve_path(dir, home),
        _ => default_home,
    };

    let objects_dir = match (config.paths.objects.as_deref(), base_dir) {
        (Some(objects), Some(base)) => resolve_path(base, objects),
        _ => home.join("objects"),
    };

    let index_path = match (config.paths.index.as_deref(), base_dir) {
        (Some(index), Some(base)) => resolve_path(base, index),
        _ => home.join("index.db"),
    };

    let capture = resolve_capture(
        config.capture.unwrap_or_default(),
        base_dir.unwrap_or(Path::new(".")),
    );
    let storage = resolve_storage(config.storage.unwrap_or_default(), env_token)?;

    Ok(ResolvedConfig {
        ledger_path: home.join("events.jsonl"),
        home,
        objects_dir,
        index_path,
        config_file: config_path.map(Path::to_path_buf),
        capture,
        storage,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let config = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    resolve_config(
        config_file.as_deref(),
        config,
        default_home,
        std::env::var(ENV_HOME).ok(),
        std::env::var(ENV_STORAGE_TOKEN).ok(),
    )
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FALLBACK_MIME_TYPE, PREFERRED_MIME_TYPE};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, yaml: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(
            None,
            ConfigFile::default(),
            PathBuf::from("/home/user/.vidjournal"),
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/home/user/.vidjournal"));
        assert_eq!(config.objects_dir, config.home.join("objects"));
        assert_eq!(config.index_path, config.home.join("index.db"));
        assert_eq!(config.ledger_path, config.home.join("events.jsonl"));
        assert!(config.config_file.is_none());

        assert_eq!(config.capture.device, DeviceKind::Command);
        assert_eq!(
            config.capture.recorder.ladder.candidates(),
            &[PREFERRED_MIME_TYPE, FALLBACK_MIME_TYPE]
        );
        assert_eq!(config.capture.recorder.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.object_prefix, "videos");
    }

    #[test]
    fn test_env_overrides() {
        let config = resolve_config(
            None,
            ConfigFile::default(),
            PathBuf::from("/home/user/.vidjournal"),
            Some("/srv/journal".to_string()),
            Some("secret".to_string()),
        )
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/journal"));
        assert_eq!(config.storage.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  objects: media
capture:
  device: scripted
  video_device: /dev/video2
  audio_device: ""
  width: 1280
  height: 720
  facing_mode: environment
  drain_timeout_ms: 2500
  encodings:
    - mime_type: video/mp4
      args: ["-f", "mp4"]
storage:
  backend: http
  endpoint: https://firebasestorage.googleapis.com
  bucket: journal.appspot.com
  object_prefix: clips
"#,
        );

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version.as_deref(), Some("1.0"));

        let config = resolve_config(
            Some(path.as_path()),
            file,
            PathBuf::from("/unused"),
            None,
            None,
        )
        .unwrap();

        assert_eq!(config.home, temp.path().join(CONFIG_DIR).join("state"));
        assert!(config.objects_dir.ends_with("media"));
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));

        let capture = &config.capture;
        assert_eq!(capture.device, DeviceKind::Scripted);
        assert_eq!(capture.command.video_device, PathBuf::from("/dev/video2"));
        assert!(capture.command.audio_device.is_none());
        assert_eq!(capture.recorder.constraints.video.ideal_width, 1280);
        assert_eq!(capture.recorder.constraints.video.facing_mode, FacingMode::Environment);
        assert_eq!(capture.recorder.drain_timeout, Duration::from_millis(2500));
        assert_eq!(capture.recorder.ladder.candidates(), &["video/mp4"]);

        assert_eq!(config.storage.backend, StorageBackend::Http);
        assert_eq!(config.storage.bucket.as_deref(), Some("journal.appspot.com"));
        assert_eq!(config.storage.object_prefix, "clips");
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let config = ConfigFile {
            storage: Some(StorageConfig {
                backend: Some(StorageBackend::Http),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(resolve_config(None, config, PathBuf::from("/h"), None, None).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
