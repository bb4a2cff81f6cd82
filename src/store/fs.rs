//! Local-directory artifact store.
//!
//! Objects live under `<root>/<object path>`. Locators use the directory's
//! `file://` URL as their base, so a locator can be checked against the store
//! that issued it before anything on disk is touched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use super::{ArtifactStore, StoreError};
use crate::domain::{Locator, ObjectPath};

/// Artifact store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    base: Url,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;

        let base = Url::from_directory_path(&root).map_err(|_| {
            StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("cannot build a file URL for {}", root.display()),
            ))
        })?;

        Ok(Self { root, base })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL every locator issued by this store starts with
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn object_file(&self, path: &ObjectPath) -> PathBuf {
        path.segments().fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    /// Map a locator to the file it names, refusing locators from other stores
    fn locate(&self, locator: &Locator) -> Result<PathBuf, StoreError> {
        let path = locator.object_path()?;
        if !locator.belongs_to(self.base.as_str()) {
            return Err(StoreError::NotFound(format!(
                "{} was not issued by {}",
                locator, self.base
            )));
        }
        Ok(self.object_file(&path))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn upload(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        mime_type: &str,
    ) -> Result<Locator, StoreError> {
        let path = ObjectPath::new(suggested_name)?;
        let file = self.object_file(&path);

        if tokio::fs::try_exists(&file).await.unwrap_or(false) {
            return Err(StoreError::Upload(format!("object already exists: {}", path)));
        }
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Upload(format!("{}: {}", parent.display(), e)))?;
        }

        // Write to a sibling first so a crash never leaves a truncated object
        let mut partial = file.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| StoreError::Upload(format!("{}: {}", partial.display(), e)))?;
        tokio::fs::rename(&partial, &file)
            .await
            .map_err(|e| StoreError::Upload(format!("{}: {}", file.display(), e)))?;

        debug!(object = %path, size_bytes = bytes.len(), mime_type, "Stored object");
        Ok(Locator::build(self.base.as_str(), &path, None))
    }

    async fn resolve_download_reference(&self, locator: &Locator) -> Result<Url, StoreError> {
        let file = self.locate(locator)?;

        if !tokio::fs::try_exists(&file).await? {
            return Err(StoreError::NotFound(locator.to_string()));
        }

        Url::from_file_path(&file).map_err(|_| StoreError::NotFound(file.display().to_string()))
    }

    async fn delete(&self, locator: &Locator) -> Result<(), StoreError> {
        let file = self.locate(locator)?;

        tokio::fs::remove_file(&file).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(locator.to_string()),
            _ => StoreError::Delete(format!("{}: {}", file.display(), e)),
        })?;

        debug!(path = %file.display(), "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_resolve_delete() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path().join("objects")).unwrap();

        let locator = store
            .upload(Bytes::from_static(b"webm bytes"), "videos/a.webm", "video/webm")
            .await
            .unwrap();
        assert_eq!(locator.object_path().unwrap().as_str(), "videos/a.webm");
        assert!(locator.belongs_to(store.base().as_str()));

        let url = store.resolve_download_reference(&locator).await.unwrap();
        let path = url.to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"webm bytes");

        store.delete(&locator).await.unwrap();
        let err = store.resolve_download_reference(&locator).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.delete(&locator).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_names_are_not_reused() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();

        store
            .upload(Bytes::from_static(b"one"), "videos/same.webm", "video/webm")
            .await
            .unwrap();
        let err = store
            .upload(Bytes::from_static(b"two"), "videos/same.webm", "video/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Upload(_)));
    }

    #[tokio::test]
    async fn test_rejects_foreign_and_broken_locators() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();

        let foreign = Locator::from_raw(
            "https://storage.example.com/v0/b/bucket/o/videos%2Fa.webm?alt=media",
        );
        assert!(store.delete(&foreign).await.unwrap_err().is_not_found());

        let broken = Locator::from_raw("not a url");
        assert!(matches!(
            store.delete(&broken).await.unwrap_err(),
            StoreError::InvalidLocator(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_object_name() {
        let dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(dir.path()).unwrap();

        let err = store
            .upload(Bytes::from_static(b"x"), "../escape.webm", "video/webm")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidLocator(_)));
    }
}
