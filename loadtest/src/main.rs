use goose::prelude::*;
use rand::Rng;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Load testing suite for the avatarkit derivative service.
///
/// The first user to start uploads originals for `avatar-0..avatar-19` and
/// `image-0..image-19`, then every user simulates production traffic:
/// - Repeated reads of a few hot avatars (cache hit path)
/// - Reads spread across many ids and variants (cache miss path)
/// - Health monitoring endpoint
///
/// # Usage
/// ```bash
/// cd loadtest
/// cargo run --release -- --host http://localhost:8080 --users 10 --hatch-rate 2 --run-time 60s
/// ```
///
/// # Performance Targets
/// - Cache hits: <10ms p95 latency
/// - Cache misses: <200ms p95 latency
/// - Error rate: <1%

const VARIANTS: [&str; 4] = ["small", "medium", "large", "original"];

/// Ids per collection that get an uploaded original.
const SEEDED: usize = 20;
const BOUNDARY: &str = "avatarkit-loadtest-boundary";

static SEED_IMAGE: OnceLock<Vec<u8>> = OnceLock::new();
static SEEDING_CLAIMED: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = SEED_IMAGE.set(seed_png()?);

    GooseAttack::initialize()?
        .register_scenario(
            scenario!("DerivativeReads")
                .register_transaction(transaction!(seed_originals).set_on_start())
                .register_transaction(transaction!(spread_avatar).set_weight(10)?)
                .register_transaction(transaction!(spread_image).set_weight(5)?)
                .register_transaction(transaction!(health_check).set_weight(1)?)
        )
        .register_scenario(
            scenario!("CachePerformance")
                .register_transaction(transaction!(seed_originals).set_on_start())
                .register_transaction(transaction!(hot_avatar).set_weight(15)?)
        )
        .execute()
        .await?;

    Ok(())
}

/// A 640x480 gradient, big enough that every variant is a real resize.
fn seed_png() -> Result<Vec<u8>, image::ImageError> {
    let img = image::RgbImage::from_fn(640, 480, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn multipart_body(file: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"seed.png\"\r\nContent-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Uploads the originals every read transaction depends on. Only the first
/// user to start does the work; uploads are idempotent PUTs regardless.
async fn seed_originals(user: &mut GooseUser) -> TransactionResult {
    if SEEDING_CLAIMED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let Some(file) = SEED_IMAGE.get() else {
        return Ok(());
    };
    let body = multipart_body(file);

    for i in 0..SEEDED {
        for (collection, prefix) in [("avatars", "avatar"), ("images", "image")] {
            let path = format!("/{}/{}-{}", collection, prefix, i);
            let request_builder = user
                .get_request_builder(&GooseMethod::Put, &path)?
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(body.clone());
            let goose_request = GooseRequest::builder()
                .set_request_builder(request_builder)
                .name("seed original")
                .build();
            let _goose = user.request(goose_request).await?;
        }
    }
    Ok(())
}

fn random_path(collection: &str, prefix: &str) -> String {
    // Generate before any await to satisfy Send bounds
    let mut rng = rand::thread_rng();
    let id = rng.gen_range(0..SEEDED);
    let variant = VARIANTS[rng.gen_range(0..VARIANTS.len())];
    format!("/{}/{}-{}?variant={}", collection, prefix, id, variant)
}

/// Reads a random avatar variant; early in a run these are mostly misses.
async fn spread_avatar(user: &mut GooseUser) -> TransactionResult {
    let path = random_path("avatars", "avatar");
    let _goose = user.get(&path).await?;
    Ok(())
}

/// Reads a random generic image variant.
async fn spread_image(user: &mut GooseUser) -> TransactionResult {
    let path = random_path("images", "image");
    let _goose = user.get(&path).await?;
    Ok(())
}

/// Fixed key, so every request after the first is a hit.
async fn hot_avatar(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/avatars/avatar-0?variant=small").await?;
    Ok(())
}

/// Baseline latency separate from image work.
async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose = user.get("/health").await?;
    Ok(())
}
