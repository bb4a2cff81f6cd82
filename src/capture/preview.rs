//! Local preview handles for finalized artifacts.
//!
//! A preview is a temporary file holding an artifact's bytes, so an external
//! player can open the recording before it is saved. Each handle has a single
//! owner; it is removed on [`PreviewHandle::release`] or when dropped.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::domain::Artifact;

/// Temporary file backing a preview of one artifact
#[derive(Debug)]
pub struct PreviewHandle {
    file: Option<NamedTempFile>,
    path: PathBuf,
    fingerprint: String,
}

impl PreviewHandle {
    /// Write `artifact` into a new temporary file in `dir` (system temp dir if `None`)
    pub fn create(artifact: &Artifact, dir: Option<&Path>) -> io::Result<Self> {
        let suffix = format!(".{}", artifact.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix("vidjournal-preview-").suffix(&suffix);

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(artifact.bytes())?;
        file.flush()?;

        Ok(Self {
            path: file.path().to_path_buf(),
            file: Some(file),
            fingerprint: artifact.fingerprint(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fingerprint of the artifact this preview shows
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_released(&self) -> bool {
        self.file.is_none()
    }

    /// Remove the preview file. Idempotent.
    pub fn release(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    #[test]
    fn test_preview_lifecycle() {
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(Bytes::from_static(b"preview bytes"), "video/webm");

        let mut preview = PreviewHandle::create(&artifact, Some(dir.path())).unwrap();
        let path = preview.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "webm");
        assert_eq!(std::fs::read(&path).unwrap(), b"preview bytes");
        assert_eq!(preview.fingerprint(), artifact.fingerprint());

        preview.release().unwrap();
        assert!(preview.is_released());
        assert!(!path.exists());

        // Second release is a no-op
        preview.release().unwrap();
    }

    #[test]
    fn test_preview_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let artifact = Artifact::new(Bytes::from_static(b"x"), "video/mp4");

        let preview = PreviewHandle::create(&artifact, Some(dir.path())).unwrap();
        let path = preview.path().to_path_buf();
        drop(preview);

        assert!(!path.exists());
    }
}
