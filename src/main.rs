use avatarkit::{config::ServiceConfig, router};
use std::net::SocketAddr;

/// Avatar and image derivative server entry point.
///
/// Initializes tracing, loads and validates configuration from the
/// environment, and serves the derivative routes.
///
/// # Configuration
/// Environment variables:
/// - `ORIGIN_URL`: storage service base URL (required in production)
/// - `APP_ENV`: `production` hides internal error details
/// - `MAX_INPUT_SIZE`: upload and fetch byte limit (default: 8MB)
/// - `UPSTREAM_TIMEOUT_SECS`: storage request timeout (default: 10)
/// - `PORT`: HTTP listen port (default: 8080)
/// - `DISABLE_RATE_LIMIT`: set to turn off per-IP rate limiting
/// - `RUST_LOG`: logging verbosity (default: "avatarkit=debug,tower_http=debug")
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avatarkit=debug,tower_http=debug".into())
        )
        .init();

    tracing::info!("Starting avatarkit server");

    let cfg = ServiceConfig::from_env()?;
    cfg.validate()?;
    tracing::info!(environment = %cfg.environment, origin = ?cfg.origin_url, "configuration loaded");

    let port = cfg.port;
    let app = router(cfg)?;

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the per-IP rate limiter.
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
