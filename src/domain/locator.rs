//! Durable references to stored artifacts.
//!
//! A [`Locator`] is the URL an artifact store hands back on upload. It has
//! the shape
//!
//! ```text
//! <store base>/o/<percent-encoded object path>?alt=media[&token=...]
//! ```
//!
//! so the store-internal [`ObjectPath`] can always be recovered from a
//! previously persisted locator, which is what delete needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Separator between the store base and the encoded object path
const OBJECT_SEGMENT: &str = "/o/";

/// Errors decoding a locator or validating an object path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("locator is not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("locator has no object segment: {0}")]
    MissingObject(String),

    #[error("invalid object path: {0:?}")]
    InvalidPath(String),
}

/// Store-internal path of an object, e.g. `videos/video_1700000000000_ab12cd34.webm`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate a relative, `/`-separated object path
    pub fn new(path: impl Into<String>) -> Result<Self, LocatorError> {
        let path = path.into();
        let trimmed = path.trim_start_matches('/');

        let valid = !trimmed.is_empty()
            && !trimmed.contains('\\')
            && !trimmed.contains('\0')
            && trimmed
                .split('/')
                .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

        if !valid {
            return Err(LocatorError::InvalidPath(path));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.0
    }
}

/// Opaque reference to an uploaded artifact
///
/// Stored verbatim; a locator read back from the index is not re-validated
/// until it is decoded, so entries with damaged locators stay listable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Build the locator for `path` under a store base URL
    pub fn build(base: &str, path: &ObjectPath, token: Option<&str>) -> Self {
        let base = base.trim_end_matches('/');
        let mut locator = format!(
            "{}{}{}?alt=media",
            base,
            OBJECT_SEGMENT,
            urlencoding::encode(path.as_str())
        );

        if let Some(token) = token {
            locator.push_str("&token=");
            locator.push_str(&urlencoding::encode(token));
        }

        Self(locator)
    }

    /// Wrap a raw string without validation (e.g. a value read back from storage)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parse and validate a locator string
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let locator = Self(raw.to_string());
        locator.object_path()?;
        Ok(locator)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn url(&self) -> Result<Url, LocatorError> {
        Url::parse(&self.0).map_err(|e| LocatorError::InvalidUrl(format!("{}: {}", self.0, e)))
    }

    /// Decode the store-internal object path
    pub fn object_path(&self) -> Result<ObjectPath, LocatorError> {
        let url = self.url()?;

        // `Url::path` keeps percent-encoding, so `%2F` inside the object
        // segment is not confused with a real separator.
        let (_, encoded) = url
            .path()
            .rsplit_once(OBJECT_SEGMENT)
            .ok_or_else(|| LocatorError::MissingObject(self.0.clone()))?;

        let decoded = urlencoding::decode(encoded)
            .map_err(|_| LocatorError::InvalidPath(encoded.to_string()))?;

        ObjectPath::new(decoded.into_owned())
    }

    /// Store base this locator was issued under, without trailing slash
    pub fn base(&self) -> Result<String, LocatorError> {
        let mut url = self.url()?;
        url.set_query(None);
        url.set_fragment(None);

        url.as_str()
            .rsplit_once(OBJECT_SEGMENT)
            .map(|(base, _)| base.to_string())
            .ok_or_else(|| LocatorError::MissingObject(self.0.clone()))
    }

    /// Whether this locator was issued by a store rooted at `base`
    pub fn belongs_to(&self, base: &str) -> bool {
        self.base()
            .map(|b| b == base.trim_end_matches('/'))
            .unwrap_or(false)
    }

    /// Download token, if the store issued one
    pub fn token(&self) -> Option<String> {
        let url = self.url().ok()?;
        let token = url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned());
        token
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
