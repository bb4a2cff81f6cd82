//! Finalized media artifacts and the chunk buffer they are built from.
//!
//! A recording attempt emits encoded chunks into a [`ChunkBuffer`]. When the
//! attempt is stopped the buffer is concatenated, in emission order, into a
//! single immutable [`Artifact`].

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// MIME type used when the encoder did not report one
pub const DEFAULT_MIME_TYPE: &str = "video/webm";

/// An immutable, finalized recording
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    bytes: Bytes,
    mime_type: String,
    created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact from already concatenated bytes
    pub fn new(bytes: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            created_at: Utc::now(),
        }
    }

    /// The container bytes. Cloning the returned `Bytes` is cheap.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// File extension matching the container part of the MIME type
    pub fn extension(&self) -> &'static str {
        let container = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match container.as_str() {
            "video/webm" | "audio/webm" => "webm",
            "video/mp4" | "audio/mp4" => "mp4",
            "video/x-matroska" => "mkv",
            "video/ogg" => "ogv",
            "video/quicktime" => "mov",
            _ => "bin",
        }
    }

    /// Content fingerprint (first 16 hex chars of SHA256)
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..8])
    }

    /// Serializable summary for logs, ledger events and display
    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            mime_type: self.mime_type.clone(),
            size_bytes: self.bytes.len() as u64,
            created_at: self.created_at,
            fingerprint: self.fingerprint(),
        }
    }
}

/// Summary of an artifact without its bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactInfo {
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
}

/// Ordered, append-only sequence of encoded segments
#[derive(Debug, Clone, Default)]
pub struct ChunkBuffer {
    chunks: Vec<Bytes>,
    total_bytes: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment. Zero-length segments are dropped and `false` is returned.
    pub fn push(&mut self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    /// Number of segments held
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
    }

    /// Concatenate every segment, in append order, into an artifact.
    ///
    /// The buffer is left empty.
    pub fn finalize(&mut self, mime_type: impl Into<String>) -> Artifact {
        let mut joined = BytesMut::with_capacity(self.total_bytes);
        for chunk in self.chunks.drain(..) {
            joined.extend_from_slice(&chunk);
        }
        self.total_bytes = 0;

        Artifact::new(joined.freeze(), mime_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_drops_empty_segments() {
        let mut buffer = ChunkBuffer::new();

        assert!(buffer.push(Bytes::from_static(b"AAA")));
        assert!(!buffer.push(Bytes::new()));
        assert!(buffer.push(Bytes::from_static(b"BB")));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.total_bytes(), 5);
    }

    #[test]
    fn test_finalize_concatenates_in_order() {
        let mut buffer = ChunkBuffer::new();
        buffer.push(Bytes::from_static(b"one-"));
        buffer.push(Bytes::from_static(b"two-"));
        buffer.push(Bytes::from_static(b"three"));

        let artifact = buffer.finalize("video/webm");

        assert_eq!(artifact.bytes().as_ref(), b"one-two-three");
        assert_eq!(artifact.len(), 13);
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_bytes(), 0);
    }

    #[test]
    fn test_extension_from_mime() {
        let webm = Artifact::new(Bytes::new(), "video/webm;codecs=vp8,opus");
        let mp4 = Artifact::new(Bytes::new(), "video/mp4");
        let unknown = Artifact::new(Bytes::new(), "application/x-whatever");

        assert_eq!(webm.extension(), "webm");
        assert_eq!(mp4.extension(), "mp4");
        assert_eq!(unknown.extension(), "bin");
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = Artifact::new(Bytes::from_static(b"same"), DEFAULT_MIME_TYPE);
        let b = Artifact::new(Bytes::from_static(b"same"), DEFAULT_MIME_TYPE);
        let c = Artifact::new(Bytes::from_static(b"different"), DEFAULT_MIME_TYPE);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }
}
