//! HTTP artifact store speaking the Firebase Storage object API.
//!
//! ```text
//! POST   {endpoint}/v0/b/{bucket}/o?name={path}   upload, returns object metadata
//! GET    {endpoint}/v0/b/{bucket}/o/{path}        object metadata (download tokens)
//! DELETE {endpoint}/v0/b/{bucket}/o/{path}        delete
//! ```
//!
//! Locators are the tokenized media URLs (`.../o/{path}?alt=media&token=..`).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ArtifactStore, StoreError};
use crate::domain::{Locator, ObjectPath};

/// Object metadata returned by the storage API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    #[serde(default)]
    size: Option<String>,
    /// Comma-separated download tokens
    #[serde(default)]
    download_tokens: Option<String>,
}

impl ObjectMetadata {
    fn first_token(&self) -> Option<&str> {
        self.download_tokens
            .as_deref()
            .and_then(|tokens| tokens.split(',').map(str::trim).find(|t| !t.is_empty()))
    }
}

/// Artifact store backed by a remote object storage bucket
pub struct HttpArtifactStore {
    /// `{endpoint}/v0/b/{bucket}`
    base: Url,
    /// Bearer token sent with every request
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl HttpArtifactStore {
    /// Create a store for `bucket` at `endpoint` (e.g. `https://firebasestorage.googleapis.com`)
    pub fn new(endpoint: &Url, bucket: &str) -> Result<Self, StoreError> {
        let base = format!(
            "{}/v0/b/{}",
            endpoint.as_str().trim_end_matches('/'),
            urlencoding::encode(bucket)
        );
        let base = Url::parse(&base).map_err(|e| {
            StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage endpoint {}: {}", base, e),
            ))
        })?;

        Ok(Self {
            base,
            auth_token: None,
            client: reqwest::Client::new(),
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Metadata URL of one object
    fn object_url(&self, path: &ObjectPath) -> String {
        format!(
            "{}/o/{}",
            self.base.as_str().trim_end_matches('/'),
            urlencoding::encode(path.as_str())
        )
    }

    fn upload_url(&self, path: &ObjectPath) -> String {
        format!(
            "{}/o?name={}",
            self.base.as_str().trim_end_matches('/'),
            urlencoding::encode(path.as_str())
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn object_path(&self, locator: &Locator) -> Result<ObjectPath, StoreError> {
        let path = locator.object_path()?;
        if !locator.belongs_to(self.base.as_str()) {
            return Err(StoreError::NotFound(format!(
                "{} was not issued by {}",
                locator, self.base
            )));
        }
        Ok(path)
    }

    async fn metadata(&self, path: &ObjectPath) -> Result<ObjectMetadata, StoreError> {
        let response = self
            .authorize(self.client.get(self.object_url(path)))
            .send()
            .await
            .map_err(|e| StoreError::MetadataRead(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(path.to_string())),
            status if !status.is_success() => Err(StoreError::MetadataRead(format!(
                "{} returned {}",
                path, status
            ))),
            _ => response
                .json()
                .await
                .map_err(|e| StoreError::MetadataRead(format!("bad metadata for {}: {}", path, e))),
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        mime_type: &str,
    ) -> Result<Locator, StoreError> {
        let path = ObjectPath::new(suggested_name)?;
        let size_bytes = bytes.len();

        let response = self
            .authorize(self.client.post(self.upload_url(&path)))
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| StoreError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Upload(format!(
                "{} returned {}: {}",
                path,
                status,
                body.trim()
            )));
        }

        let metadata: ObjectMetadata = response
            .json()
            .await
            .map_err(|e| StoreError::Upload(format!("bad upload response: {}", e)))?;

        debug!(
            object = %metadata.name,
            size_bytes,
            reported_size = metadata.size.as_deref().unwrap_or("?"),
            "Uploaded object"
        );

        Ok(Locator::build(self.base.as_str(), &path, metadata.first_token()))
    }

    async fn resolve_download_reference(&self, locator: &Locator) -> Result<Url, StoreError> {
        let path = self.object_path(locator)?;
        let metadata = self.metadata(&path).await?;

        // Prefer the token the object has now; tokens can be revoked
        let current = Locator::build(self.base.as_str(), &path, metadata.first_token());
        Ok(current.url()?)
    }

    async fn delete(&self, locator: &Locator) -> Result<(), StoreError> {
        let path = self.object_path(locator)?;

        let response = self
            .authorize(self.client.delete(self.object_url(&path)))
            .send()
            .await
            .map_err(|e| StoreError::Delete(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(path.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(StoreError::Delete(format!("{} returned {}", path, status))),
        }
    }
}
