#![allow(dead_code)]

use async_trait::async_trait;
use avatarkit::fetch::{MemoryOriginStore, OriginStore, ResourceMeta};
use avatarkit::DerivativeError;
use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, Rgb};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::Notify;

/// PNG with a gradient so resampling has something to chew on.
pub fn png(width: u32, height: u32) -> Bytes {
    let buf = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(buf)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(out)
}

pub fn dimensions(bytes: &[u8]) -> (u32, u32) {
    use image::GenericImageView;
    image::load_from_memory(bytes).unwrap().dimensions()
}

pub fn is_webp(bytes: &[u8]) -> bool {
    bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

pub async fn memory_store(originals: &[(&str, Bytes)]) -> Arc<MemoryOriginStore> {
    let store = Arc::new(MemoryOriginStore::new());
    for (id, bytes) in originals {
        store.store_original(id, bytes.clone()).await.unwrap();
    }
    store
}

/// Store whose every call fails like an unreachable upstream.
pub struct UnreachableStore;

#[async_trait]
impl OriginStore for UnreachableStore {
    async fn resource_meta(&self, _id: &str) -> Result<ResourceMeta, DerivativeError> {
        Err(DerivativeError::UpstreamFetch("connection refused".into()))
    }

    async fn fetch_original(&self, _id: &str) -> Result<Bytes, DerivativeError> {
        Err(DerivativeError::UpstreamFetch("connection refused".into()))
    }

    async fn store_original(&self, _id: &str, _bytes: Bytes) -> Result<(), DerivativeError> {
        Err(DerivativeError::UpstreamFetch("connection refused".into()))
    }

    async fn delete_original(&self, _id: &str) -> Result<(), DerivativeError> {
        Err(DerivativeError::UpstreamFetch("connection refused".into()))
    }
}

/// Wraps a memory store and parks `fetch_original` until released.
pub struct GatedStore {
    pub inner: MemoryOriginStore,
    pub started: Notify,
    pub release: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self { inner: MemoryOriginStore::new(), started: Notify::new(), release: Notify::new() }
    }
}

#[async_trait]
impl OriginStore for GatedStore {
    async fn resource_meta(&self, id: &str) -> Result<ResourceMeta, DerivativeError> {
        self.inner.resource_meta(id).await
    }

    async fn fetch_original(&self, id: &str) -> Result<Bytes, DerivativeError> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.fetch_original(id).await
    }

    async fn store_original(&self, id: &str, bytes: Bytes) -> Result<(), DerivativeError> {
        self.inner.store_original(id, bytes).await
    }

    async fn delete_original(&self, id: &str) -> Result<(), DerivativeError> {
        self.inner.delete_original(id).await
    }
}
