use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod transform;

use crate::cache::{derivative_headers, download_filename, CacheStats, DerivativeCache, Variant};
use crate::config::{ServiceConfig, NO_CACHE_CONTROL, OUTPUT_CONTENT_TYPE};
use crate::fetch::{HttpOriginStore, MemoryOriginStore, OriginStore};
use crate::transform::{canonicalize_upload, DerivativeQuery, ResourceKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivativeError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream fetch error: {0}")]
    UpstreamFetch(String),
    #[error("Transformation error: {0}")]
    Transform(String),
    #[error("Invalid argument: {0}")]
    Validation(String),
}

impl DerivativeError {
    pub fn kind(&self) -> &'static str {
        match self {
            DerivativeError::NotFound(_) => "not_found",
            DerivativeError::UpstreamFetch(_) => "upstream_fetch_error",
            DerivativeError::Transform(_) => "transform_error",
            DerivativeError::Validation(_) => "validation_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DerivativeError::NotFound(_) => StatusCode::NOT_FOUND,
            DerivativeError::UpstreamFetch(_) => StatusCode::BAD_GATEWAY,
            DerivativeError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DerivativeError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

pub type Result<T> = std::result::Result<T, DerivativeError>;

/// Error as rendered at the HTTP boundary.
///
/// 5xx details are replaced by a generic message unless the service runs
/// outside production.
#[derive(Debug)]
pub struct ApiError {
    error: DerivativeError,
    expose_details: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let message = match &self.error {
            DerivativeError::NotFound(msg) | DerivativeError::Validation(msg) => msg.clone(),
            other if self.expose_details => other.to_string(),
            DerivativeError::UpstreamFetch(_) => "Failed to fetch original image".to_string(),
            DerivativeError::Transform(_) => "Failed to process image".to_string(),
        };
        (status, Json(json!({ "error": self.error.kind(), "message": message }))).into_response()
    }
}

/// Origin store plus derivative cache for one resource family.
#[derive(Clone)]
pub struct ResourceService {
    pub kind: ResourceKind,
    pub store: Arc<dyn OriginStore>,
    pub cache: DerivativeCache,
}

impl ResourceService {
    pub fn new(kind: ResourceKind, store: Arc<dyn OriginStore>) -> Self {
        let cache = DerivativeCache::new(Arc::clone(&store), kind.fit());
        Self { kind, store, cache }
    }
}

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub avatars: ResourceService,
    pub images: ResourceService,
}

impl AppState {
    /// Builds stores from configuration: HTTP stores under `{origin}/avatars`
    /// and `{origin}/images` when an origin is configured, in-memory stores
    /// otherwise.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let store_for = |kind: ResourceKind| -> Result<Arc<dyn OriginStore>> {
            match &config.origin_url {
                Some(origin) => {
                    let base = format!("{}/{}", origin.trim_end_matches('/'), kind.collection());
                    let store =
                        HttpOriginStore::new(&base, config.max_input_size, config.upstream_timeout)?;
                    Ok(Arc::new(store))
                }
                None => Ok(Arc::new(MemoryOriginStore::new())),
            }
        };
        let avatar_store = store_for(ResourceKind::Avatar)?;
        let image_store = store_for(ResourceKind::Image)?;
        if config.origin_url.is_none() {
            tracing::warn!("ORIGIN_URL not set; originals are kept in process memory");
        }
        Ok(Self::with_stores(config, avatar_store, image_store))
    }

    pub fn with_stores(
        config: ServiceConfig,
        avatar_store: Arc<dyn OriginStore>,
        image_store: Arc<dyn OriginStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            avatars: ResourceService::new(ResourceKind::Avatar, avatar_store),
            images: ResourceService::new(ResourceKind::Image, image_store),
        }
    }

    fn service(&self, kind: ResourceKind) -> &ResourceService {
        match kind {
            ResourceKind::Avatar => &self.avatars,
            ResourceKind::Image => &self.images,
        }
    }

    fn api_error(&self, error: DerivativeError) -> ApiError {
        ApiError { error, expose_details: self.config.expose_error_details() }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub bytes: usize,
    pub content_type: &'static str,
}

async fn serve_derivative(
    state: &AppState,
    kind: ResourceKind,
    resource_id: &str,
    raw_query: Option<&str>,
) -> std::result::Result<Response, ApiError> {
    let query: DerivativeQuery = raw_query
        .unwrap_or("")
        .parse()
        .map_err(|e: serde_urlencoded::de::Error| {
            state.api_error(DerivativeError::Validation(format!("Invalid query: {}", e)))
        })?;
    let variant = query.variant();

    tracing::debug!("Processing {} request: id={}, variant={}, download={}",
                    kind, resource_id, variant, query.download);

    let (bytes, status) = state
        .service(kind)
        .cache
        .get(resource_id, variant)
        .await
        .map_err(|e| state.api_error(e))?;

    let filename = query
        .download
        .then(|| download_filename(kind.label(), resource_id, variant));
    let headers = derivative_headers(&bytes, status, filename.as_deref());
    Ok((headers, Body::from(bytes)).into_response())
}

async fn read_upload(multipart: &mut Multipart) -> Result<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DerivativeError::Validation(format!("Invalid multipart: {}", e)))?
    {
        if matches!(field.name(), Some("file") | Some("avatar") | Some("image")) {
            return field
                .bytes()
                .await
                .map_err(|e| DerivativeError::Validation(format!("Invalid file: {}", e)));
        }
    }
    Err(DerivativeError::Validation("Missing file".into()))
}

async fn replace_original(
    state: &AppState,
    kind: ResourceKind,
    resource_id: &str,
    mut multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    cache::key::validate_resource_id(resource_id).map_err(|e| state.api_error(e))?;
    let upload = read_upload(&mut multipart).await.map_err(|e| state.api_error(e))?;

    let canonical = tokio::task::spawn_blocking(move || canonicalize_upload(&upload, kind))
        .await
        .map_err(|e| state.api_error(DerivativeError::Transform(e.to_string())))?
        .map_err(|e| {
            // An upload that will not decode is the client's problem.
            state.api_error(DerivativeError::Validation(format!("Invalid image upload: {}", e)))
        })?;
    let canonical = Bytes::from(canonical);

    let service = state.service(kind);
    service
        .store
        .store_original(resource_id, canonical.clone())
        .await
        .map_err(|e| {
            tracing::error!(resource_id, %kind, error = %e, "failed to store original");
            state.api_error(e)
        })?;

    service.cache.invalidate(resource_id);
    // The stored original is already in the output format.
    service
        .cache
        .put(resource_id, Variant::Original, canonical.clone())
        .map_err(|e| state.api_error(e))?;

    tracing::info!(resource_id, %kind, size = canonical.len(), "original replaced");

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE_CONTROL));
    let body = UploadResponse {
        id: resource_id.to_string(),
        bytes: canonical.len(),
        content_type: OUTPUT_CONTENT_TYPE,
    };
    Ok((StatusCode::CREATED, headers, Json(body)).into_response())
}

async fn remove_original(
    state: &AppState,
    kind: ResourceKind,
    resource_id: &str,
) -> std::result::Result<Response, ApiError> {
    let service = state.service(kind);
    service
        .store
        .delete_original(resource_id)
        .await
        .map_err(|e| state.api_error(e))?;
    service.cache.invalidate(resource_id);
    tracing::info!(resource_id, %kind, "original deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn get_avatar(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    RawQuery(query): RawQuery,
) -> std::result::Result<Response, ApiError> {
    serve_derivative(&state, ResourceKind::Avatar, &user_id, query.as_deref()).await
}

async fn upload_avatar(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    replace_original(&state, ResourceKind::Avatar, &user_id, multipart).await
}

async fn delete_avatar(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> std::result::Result<Response, ApiError> {
    remove_original(&state, ResourceKind::Avatar, &user_id).await
}

async fn get_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    RawQuery(query): RawQuery,
) -> std::result::Result<Response, ApiError> {
    serve_derivative(&state, ResourceKind::Image, &image_id, query.as_deref()).await
}

async fn upload_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    replace_original(&state, ResourceKind::Image, &image_id, multipart).await
}

async fn delete_image(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> std::result::Result<Response, ApiError> {
    remove_original(&state, ResourceKind::Image, &image_id).await
}

// ====================================================================================
// OBSERVABILITY
// ====================================================================================

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "avatarkit",
        "environment": state.config.environment.to_string(),
    }))
}

fn stats_json(stats: &CacheStats) -> serde_json::Value {
    json!({
        "entry_count": stats.entry_count,
        "total_size_bytes": stats.total_size_bytes,
        "total_size_mb": stats.total_size_bytes as f64 / 1024.0 / 1024.0,
        "in_flight": stats.in_flight,
        "requests": {
            "cache_hits": stats.hits,
            "cache_misses": stats.misses,
            "total": stats.hits + stats.misses,
            "hit_rate_percent": stats.hit_rate_percent(),
        },
        "transforms": {
            "total": stats.transforms,
            "errors": stats.errors,
        }
    })
}

/// Cache statistics endpoint
async fn cache_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "avatars": stats_json(&state.avatars.cache.stats()),
        "images": stats_json(&state.images.cache.stats()),
    }))
}

/// Metrics endpoint (Prometheus-compatible plain text)
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut metrics = String::new();
    let families: [(&str, &str, fn(&CacheStats) -> u64); 6] = [
        ("avatarkit_cache_hits_total", "Total number of cache hits", |s| s.hits),
        ("avatarkit_cache_misses_total", "Total number of cache misses", |s| s.misses),
        ("avatarkit_transforms_total", "Total number of image transformations", |s| s.transforms),
        ("avatarkit_errors_total", "Total number of failed derivative computations", |s| s.errors),
        ("avatarkit_cache_entries", "Derivatives currently cached", |s| s.entry_count as u64),
        ("avatarkit_cache_bytes", "Bytes held by cached derivatives", |s| s.total_size_bytes),
    ];
    let caches = [
        ("avatar", state.avatars.cache.stats()),
        ("image", state.images.cache.stats()),
    ];

    for (name, help, value) in families {
        let kind = if name.ends_with("_total") { "counter" } else { "gauge" };
        metrics.push_str(&format!("# HELP {} {}\n# TYPE {} {}\n", name, help, name, kind));
        for (cache, stats) in &caches {
            metrics.push_str(&format!("{}{{cache=\"{}\"}} {}\n", name, cache, value(stats)));
        }
    }

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Build the full service router from configuration.
pub fn router(config: ServiceConfig) -> Result<Router> {
    Ok(router_with_state(AppState::from_config(config)?))
}

/// Build the router around prepared state (custom stores, tests).
pub fn router_with_state(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Observability endpoints - NO rate limiting
    let observability_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/metrics", get(metrics_handler));

    let mut image_routes = Router::new()
        .route(
            "/avatars/:user_id",
            get(get_avatar).post(upload_avatar).put(upload_avatar).delete(delete_avatar),
        )
        .route(
            "/images/:image_id",
            get(get_image).post(upload_image).put(upload_image).delete(delete_image),
        )
        .layer(DefaultBodyLimit::max(config.max_input_size));

    if config.rate_limit {
        // 10 req/sec per IP, burst of 30
        match GovernorConfigBuilder::default().per_second(10).burst_size(30).finish() {
            Some(governor_conf) => {
                tracing::info!("Router configured with rate limiting: 10/sec, burst 30");
                image_routes = image_routes.layer(GovernorLayer {
                    config: Box::leak(Box::new(governor_conf)),
                });
            }
            None => tracing::warn!("Invalid rate limit configuration; rate limiting disabled"),
        }
    } else {
        tracing::info!("Rate limiting disabled");
    }

    Router::new()
        .merge(observability_routes)
        .merge(image_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
