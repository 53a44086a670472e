pub mod params;

use crate::config::{OUTPUT_EFFORT, OUTPUT_QUALITY};
use crate::DerivativeError;
use image::DynamicImage;
use image::GenericImageView;
use image::imageops::FilterType;

pub use params::{DerivativeQuery, FitPolicy, ResourceKind};

/// Decodes raw image bytes into memory-resident representation.
///
/// The format is detected from magic bytes rather than trusted from any
/// upstream `Content-Type`.
///
/// # Errors
/// Returns `DerivativeError::Transform` if the format is unknown, the data
/// is corrupt, or the image has a zero dimension.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DerivativeError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| DerivativeError::Transform(e.to_string()))?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| DerivativeError::Transform(e.to_string()))?;

    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(DerivativeError::Transform("Invalid image dimensions".into()));
    }

    Ok(img)
}

/// Fits an image into a `size`×`size` box.
///
/// - `Cover`: scales so the box is fully covered, then center-crops; the
///   result is always exactly `size`×`size`.
/// - `Inside`: scales down preserving aspect ratio so both sides are at most
///   `size`; images already inside the box are returned unchanged.
///
/// Lanczos3 is used for resampling in both cases.
pub fn resize_image(img: DynamicImage, size: u32, fit: FitPolicy) -> DynamicImage {
    let size = size.max(1);
    match fit {
        FitPolicy::Cover => img.resize_to_fill(size, size, FilterType::Lanczos3),
        FitPolicy::Inside => {
            let (w, h) = img.dimensions();
            if w <= size && h <= size {
                img
            } else {
                img.resize(size, size, FilterType::Lanczos3)
            }
        }
    }
}

/// Encodes to lossy WebP at the process-wide quality and effort.
pub fn encode_image(img: &DynamicImage) -> Result<Vec<u8>, DerivativeError> {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    let mut config = webp::WebPConfig::new()
        .map_err(|_| DerivativeError::Transform("Failed to initialize WebP encoder".into()))?;
    config.lossless = 0;
    config.quality = OUTPUT_QUALITY;
    config.method = OUTPUT_EFFORT;

    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), w, h);
    let encoded = encoder
        .encode_advanced(&config)
        .map_err(|e| DerivativeError::Transform(format!("WebP encode failed: {:?}", e)))?;

    let mut out = Vec::with_capacity(encoded.len());
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// Full derivative pipeline: decode, optionally resize, re-encode.
///
/// `target` is `None` for the `original` variant, which keeps the source
/// dimensions but still normalizes the encoding.
pub fn render_derivative(
    bytes: &[u8],
    target: Option<u32>,
    fit: FitPolicy,
) -> Result<Vec<u8>, DerivativeError> {
    let img = decode_image(bytes)?;
    let img = match target {
        Some(size) => resize_image(img, size, fit),
        None => img,
    };
    encode_image(&img)
}

/// Normalizes an uploaded original to the canonical size for its kind
/// before it is handed to storage.
pub fn canonicalize_upload(bytes: &[u8], kind: ResourceKind) -> Result<Vec<u8>, DerivativeError> {
    render_derivative(bytes, Some(kind.upload_size()), kind.fit())
}
