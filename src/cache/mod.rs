pub mod key;
pub mod memory;

pub use key::{belongs_to, make_key, DerivativeKey, Variant};
pub use memory::{CacheStats, CacheStatus, DerivativeCache, DerivativeEntry};

use crate::config::{DEFAULT_CACHE_CONTROL, OUTPUT_CONTENT_TYPE, OUTPUT_EXTENSION};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};

/// Debug header carrying `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Generate a strong ETag from derivative bytes
pub fn etag_for_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Attachment filename for a derivative, e.g. `avatar-u1-small.webp`.
///
/// Characters outside `[A-Za-z0-9_-]` in the resource id are replaced so
/// the name is always a valid quoted header value.
pub fn download_filename(prefix: &str, resource_id: &str, variant: Variant) -> String {
    let safe_id: String = resource_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}-{}.{}", prefix, safe_id, variant, OUTPUT_EXTENSION)
}

/// Response headers for serving a derivative.
///
/// `download` carries the attachment filename when the caller asked for a
/// download disposition.
pub fn derivative_headers(bytes: &[u8], status: CacheStatus, download: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(OUTPUT_CONTENT_TYPE));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
    if let Ok(etag) = HeaderValue::from_str(&etag_for_bytes(bytes)) {
        headers.insert(header::ETAG, etag);
    }
    if let Some(filename) = download {
        let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    headers
}
