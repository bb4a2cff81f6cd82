//! Encoding preference ladder.
//!
//! The recorder asks for the most specific container/codec pairing first,
//! falls back to the generic container, and finally lets the device choose.

use serde::{Deserialize, Serialize};

/// WebM with VP8 video and Opus audio
pub const PREFERRED_MIME_TYPE: &str = "video/webm;codecs=vp8,opus";

/// Generic WebM, codecs chosen by the encoder
pub const FALLBACK_MIME_TYPE: &str = "video/webm";

/// Ordered list of MIME types to try, most specific first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodingLadder {
    candidates: Vec<String>,
}

impl Default for EncodingLadder {
    fn default() -> Self {
        Self::new([PREFERRED_MIME_TYPE, FALLBACK_MIME_TYPE])
    }
}

impl EncodingLadder {
    pub fn new(candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// First supported candidate, or `None` to let the device decide
    pub fn select(&self, is_supported: impl Fn(&str) -> bool) -> Option<&str> {
        self.candidates
            .iter()
            .map(String::as_str)
            .find(|candidate| is_supported(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_specific_codec() {
        let ladder = EncodingLadder::default();
        assert_eq!(ladder.select(|_| true), Some(PREFERRED_MIME_TYPE));
    }

    #[test]
    fn test_falls_back_to_container() {
        let ladder = EncodingLadder::default();
        assert_eq!(
            ladder.select(|mime| mime == FALLBACK_MIME_TYPE),
            Some(FALLBACK_MIME_TYPE)
        );
    }

    #[test]
    fn test_device_default_when_nothing_supported() {
        let ladder = EncodingLadder::default();
        assert_eq!(ladder.select(|_| false), None);
        assert_eq!(EncodingLadder::new(Vec::<String>::new()).select(|_| true), None);
    }

    #[test]
    fn test_order_is_preserved() {
        let ladder = EncodingLadder::new(["video/mp4", "video/webm", "video/x-matroska"]);
        let supported = ["video/x-matroska", "video/webm"];

        assert_eq!(ladder.select(|m| supported.contains(&m)), Some("video/webm"));
        assert_eq!(
            ladder.candidates(),
            &["video/mp4", "video/webm", "video/x-matroska"]
        );
    }
}
