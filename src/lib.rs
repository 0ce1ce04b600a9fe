//! Syncdata API Library
//!
//! Replace-sync backend for the accounting tables exported by the IMC1, IMC2,
//! Sysmac, DQ and Planet source systems.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use anyhow::bail;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, Uri},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    services::{IngestSettings, SyncService},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub sync: SyncService,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig) -> Self {
        let sync = SyncService::new(db.clone(), IngestSettings::from(&config.sync));
        Self {
            db,
            config: Arc::new(config),
            sync,
        }
    }
}

// Common response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn failure(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            message: Some(message.into()),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Routes without middleware or state
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { "syncdata-api up" }))
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .merge(handlers::sync::sync_routes())
        .merge(openapi::openapi_routes())
        .fallback(route_not_found)
}

async fn route_not_found(uri: Uri) -> ServiceError {
    ServiceError::NotFound(format!("no route for {}", uri.path()))
}

/// Builds the CORS layer from configuration.
///
/// Explicit origins win; otherwise permissive CORS is only allowed in
/// development or when explicitly opted in.
pub fn cors_layer(cfg: &AppConfig) -> anyhow::Result<CorsLayer> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        ::tracing::error!("Missing CORS configuration detected; set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
        bail!("Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true")
    }
}

/// Full application router with every middleware layer applied.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cfg = state.config.clone();

    let mut app = api_routes()
        // Bodies are bounded by the tower-http limit below, not axum's default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(cfg.max_body_size));

    if let Some(timeout) = cfg.request_timeout() {
        app = app.layer(TimeoutLayer::new(timeout));
    }

    let app = app
        .layer(axum::middleware::from_fn(request_logging_middleware))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(CompressionLayer::new())
        .layer(cors_layer(&cfg)?)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state);

    Ok(app)
}

/// Service version and environment
#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Service information", body = serde_json::Value)),
    tag = "Health"
)]
pub async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "syncdata-api",
        "tables": entities::registry().len(),
        "timestamp": Utc::now().to_rfc3339(),
        "environment": state.config.environment,
    });

    Json(ApiResponse::success(status_data))
}

/// Database connectivity check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database reachable", body = serde_json::Value),
        (status = 503, description = "Database unreachable", body = serde_json::Value),
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<Value>>) {
    let db_healthy = db::check_connection(&state.db).await.is_ok();
    let db_status = if db_healthy { "healthy" } else { "unhealthy" };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    if db_healthy {
        (StatusCode::OK, Json(ApiResponse::success(health_data)))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::failure(health_data, "database unreachable")),
        )
    }
}

// Request logging middleware
async fn request_logging_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    ::tracing::debug!(method = %method, uri = %uri, "Incoming request");

    let response = next.run(request).await;

    let duration = start.elapsed();
    ::tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::db::*;
    pub use crate::entities::{registry, EntityTag, TableRole, TableSchema};
    pub use crate::errors::*;
    pub use crate::services::*;
    pub use crate::{build_router, AppState};
}
