use crate::cache::key::validate_resource_id;
use crate::config::OUTPUT_CONTENT_TYPE;
use crate::DerivativeError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use mime::Mime;
use reqwest::{Client, StatusCode, Url};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// What the storage service knows about a resource without sending bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceMeta {
    pub has_original: bool,
    pub content_length: Option<u64>,
}

/// The authoritative store of original images.
///
/// The cache only ever calls `resource_meta` and `fetch_original`; the
/// mutation methods are used by the upload and delete handlers.
#[async_trait::async_trait]
pub trait OriginStore: Send + Sync {
    async fn resource_meta(&self, resource_id: &str) -> Result<ResourceMeta, DerivativeError>;

    async fn fetch_original(&self, resource_id: &str) -> Result<Bytes, DerivativeError>;

    async fn store_original(&self, resource_id: &str, bytes: Bytes) -> Result<(), DerivativeError>;

    async fn delete_original(&self, resource_id: &str) -> Result<(), DerivativeError>;
}

/// Origin store backed by an HTTP object service laid out as
/// `{base}/{resource_id}`.
///
/// Fetches are validated before they reach the decoder:
/// 1. HTTP status (404 is `NotFound`, any other failure is upstream)
/// 2. Content-Type must be `image/*` when parseable
/// 3. Content-Length against `max_size`
/// 4. Streaming size enforcement, so a lying header cannot exhaust memory
pub struct HttpOriginStore {
    client: Client,
    base: Url,
    max_size: usize,
}

impl HttpOriginStore {
    pub fn new(base_url: &str, max_size: usize, timeout: Duration) -> Result<Self, DerivativeError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| DerivativeError::Validation(format!("Invalid origin URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(DerivativeError::Validation(format!("Origin URL cannot be a base: {}", base_url)));
        }
        // Trailing slash so joined ids extend the path instead of replacing it.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DerivativeError::UpstreamFetch(e.to_string()))?;
        Ok(Self { client, base, max_size })
    }

    fn url_for(&self, resource_id: &str) -> Result<Url, DerivativeError> {
        validate_resource_id(resource_id)?;
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DerivativeError::Validation("Origin URL cannot be a base".into()))?
            .pop_if_empty()
            .push(resource_id);
        Ok(url)
    }
}

fn transport_error(e: reqwest::Error) -> DerivativeError {
    if e.is_timeout() {
        DerivativeError::UpstreamFetch(format!("Upstream timeout: {}", e))
    } else {
        DerivativeError::UpstreamFetch(e.to_string())
    }
}

fn status_error(resource_id: &str, status: StatusCode) -> DerivativeError {
    if status == StatusCode::NOT_FOUND {
        DerivativeError::NotFound(format!("No original stored for {}", resource_id))
    } else {
        DerivativeError::UpstreamFetch(format!("Upstream status: {}", status))
    }
}

#[async_trait::async_trait]
impl OriginStore for HttpOriginStore {
    async fn resource_meta(&self, resource_id: &str) -> Result<ResourceMeta, DerivativeError> {
        let resp = self
            .client
            .head(self.url_for(resource_id)?)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            // HEAD carries no body, so the length comes from the header.
            s if s.is_success() => Ok(ResourceMeta {
                has_original: true,
                content_length: resp
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok()),
            }),
            StatusCode::NOT_FOUND => Ok(ResourceMeta::default()),
            s => Err(status_error(resource_id, s)),
        }
    }

    async fn fetch_original(&self, resource_id: &str) -> Result<Bytes, DerivativeError> {
        let resp = self
            .client
            .get(self.url_for(resource_id)?)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resource_id, resp.status()));
        }

        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if let Ok(m) = ct.parse::<Mime>() {
            if m.type_().as_str() != "image" {
                return Err(DerivativeError::UpstreamFetch(format!(
                    "Origin returned non-image content type: {}",
                    m
                )));
            }
        }
        // Unknown MIME types continue; the decoder has the final say.

        if let Some(len) = resp.content_length() {
            if len as usize > self.max_size {
                return Err(DerivativeError::UpstreamFetch("Original exceeds size limit".into()));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await.transpose().map_err(transport_error)? {
            if buf.len() + chunk.len() > self.max_size {
                return Err(DerivativeError::UpstreamFetch("Original exceeds size limit".into()));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }

    async fn store_original(&self, resource_id: &str, bytes: Bytes) -> Result<(), DerivativeError> {
        let resp = self
            .client
            .put(self.url_for(resource_id)?)
            .header(reqwest::header::CONTENT_TYPE, OUTPUT_CONTENT_TYPE)
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            return Err(DerivativeError::UpstreamFetch(format!("Upstream status: {}", resp.status())));
        }
        Ok(())
    }

    async fn delete_original(&self, resource_id: &str) -> Result<(), DerivativeError> {
        let resp = self
            .client
            .delete(self.url_for(resource_id)?)
            .send()
            .await
            .map_err(transport_error)?;

        if !resp.status().is_success() {
            return Err(status_error(resource_id, resp.status()));
        }
        Ok(())
    }
}

/// In-process origin store for development and tests.
#[derive(Default)]
pub struct MemoryOriginStore {
    originals: RwLock<HashMap<String, Bytes>>,
    fetches: AtomicU64,
}

impl MemoryOriginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch_original` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl OriginStore for MemoryOriginStore {
    async fn resource_meta(&self, resource_id: &str) -> Result<ResourceMeta, DerivativeError> {
        let originals = self.originals.read().await;
        Ok(match originals.get(resource_id) {
            Some(bytes) => ResourceMeta { has_original: true, content_length: Some(bytes.len() as u64) },
            None => ResourceMeta::default(),
        })
    }

    async fn fetch_original(&self, resource_id: &str) -> Result<Bytes, DerivativeError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.originals
            .read()
            .await
            .get(resource_id)
            .cloned()
            .ok_or_else(|| DerivativeError::NotFound(format!("No original stored for {}", resource_id)))
    }

    async fn store_original(&self, resource_id: &str, bytes: Bytes) -> Result<(), DerivativeError> {
        validate_resource_id(resource_id)?;
        self.originals.write().await.insert(resource_id.to_string(), bytes);
        Ok(())
    }

    async fn delete_original(&self, resource_id: &str) -> Result<(), DerivativeError> {
        match self.originals.write().await.remove(resource_id) {
            Some(_) => Ok(()),
            None => Err(DerivativeError::NotFound(format!("No original stored for {}", resource_id))),
        }
    }
}
