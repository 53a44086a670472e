mod common;

use avatarkit::transform::{
    canonicalize_upload, decode_image, encode_image, render_derivative, resize_image, FitPolicy,
    ResourceKind,
};
use avatarkit::DerivativeError;
use common::{dimensions, is_webp, png};
use image::GenericImageView;

#[test]
fn cover_crops_to_exact_square() {
    let img = image::DynamicImage::new_rgb8(800, 600);
    let resized = resize_image(img, 300, FitPolicy::Cover);
    assert_eq!(resized.dimensions(), (300, 300));
}

#[test]
fn cover_upscales_small_sources() {
    let img = image::DynamicImage::new_rgb8(40, 30);
    assert_eq!(resize_image(img, 100, FitPolicy::Cover).dimensions(), (100, 100));
}

#[test]
fn inside_preserves_aspect_ratio() {
    let img = image::DynamicImage::new_rgb8(600, 1200);
    assert_eq!(resize_image(img, 600, FitPolicy::Inside).dimensions(), (300, 600));
}

#[test]
fn decode_then_webp() {
    let decoded = decode_image(&png(64, 64)).unwrap();
    let out = encode_image(&decoded).unwrap();
    assert!(is_webp(&out));
    assert_eq!(dimensions(&out), (64, 64));
}

#[test]
fn original_variant_keeps_dimensions() {
    let out = render_derivative(&png(321, 123), None, FitPolicy::Cover).unwrap();
    assert!(is_webp(&out));
    assert_eq!(dimensions(&out), (321, 123));
}

#[test]
fn rendering_is_deterministic() {
    let source = png(500, 400);
    let a = render_derivative(&source, Some(100), FitPolicy::Cover).unwrap();
    let b = render_derivative(&source, Some(100), FitPolicy::Cover).unwrap();
    assert_eq!(a, b);
}

#[test]
fn garbage_is_a_transform_error() {
    let err = decode_image(b"GIF? no.").unwrap_err();
    assert!(matches!(err, DerivativeError::Transform(_)));
}

#[test]
fn uploads_are_canonicalized_per_kind() {
    let avatar = canonicalize_upload(&png(1000, 600), ResourceKind::Avatar).unwrap();
    assert_eq!(dimensions(&avatar), (400, 400));

    let image = canonicalize_upload(&png(1600, 900), ResourceKind::Image).unwrap();
    assert_eq!(dimensions(&image), (800, 450));

    let small = canonicalize_upload(&png(200, 100), ResourceKind::Image).unwrap();
    assert_eq!(dimensions(&small), (200, 100));
}
