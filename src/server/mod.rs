//! HTTP surface
//!
//! `GET /_ipx/{modifiers}/{source...}` serves transformed images, `GET
//! /health` reports liveness. Errors are returned as
//! `{ "statusCode", "statusMessage" }` JSON bodies.

use crate::config::Config;
use crate::error::{IpxError, IpxResult};
use crate::orchestrator::{ImageBody, ImageResponse, Orchestrator};
use crate::transform::ImageBackend;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Diagnostic header reporting HIT, MISS or BYPASS
pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-ipx-cache");

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    cache_control: HeaderValue,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, ttl_seconds: u64) -> IpxResult<Self> {
        let cache_control = HeaderValue::try_from(cache_control_value(ttl_seconds))
            .map_err(|e| IpxError::Internal(format!("invalid Cache-Control value: {}", e)))?;
        Ok(Self {
            orchestrator,
            cache_control,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Build state with the default image backend
    pub fn from_config(config: &Config) -> IpxResult<Self> {
        let backend = Arc::new(ImageBackend::from_settings(&config.ipx_settings)?);
        let orchestrator = Arc::new(Orchestrator::new(config, backend)?);
        Self::new(orchestrator, config.ipx_settings.image_cache_ttl_seconds)
    }
}

fn cache_control_value(ttl: u64) -> String {
    format!(
        "public, max-age={ttl}, s-maxage={ttl}, immutable, stale-while-revalidate=600"
    )
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/_ipx", get(missing_path))
        .route("/_ipx/{*path}", get(image))
        .with_state(state)
}

/// Bind and serve until interrupted
pub async fn serve(config: &Config) -> IpxResult<()> {
    let state = AppState::from_config(config)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| IpxError::io(format!("binding {}", addr), e))?;

    info!(
        "Listening on http://{} (sources: {}, cache: {})",
        addr,
        config.ipx_settings.fs_dir.display(),
        config.ipx_settings.disk_cache_dir.display()
    );

    let orchestrator = state.orchestrator().clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| IpxError::io("serving HTTP", e))?;

    let stats = orchestrator.coalescer_stats();
    info!(
        transforms_requested = stats.total_requests,
        coalesced = stats.coalesced_requests,
        "Server stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    status_code: u16,
    status_message: String,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn missing_path() -> Response {
    error_response(&IpxError::InvalidRequestShape(
        "expected /_ipx/{modifiers}/{source}".to_string(),
    ))
}

async fn image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let (modifiers, source) = path.split_once('/').unwrap_or((path.as_str(), ""));
    let source = match query.filter(|q| !q.is_empty()) {
        Some(q) if is_remote(source) => format!("{}?{}", source, q),
        _ => source.to_string(),
    };

    let span = info_span!(
        "request",
        id = %Uuid::new_v4(),
        modifiers = %modifiers,
        source = %source
    );

    async move {
        match state.orchestrator.handle(modifiers, &source).await {
            Ok(image) => {
                info!(cache = %image.cache_status, "Served");
                image_response(image, &state.cache_control, headers.get(IF_NONE_MATCH))
            }
            Err(e) => {
                if e.is_client_error() {
                    warn!(status = e.status_code(), "Request rejected: {}", e);
                } else {
                    error!(status = e.status_code(), "Request failed: {}", e);
                }
                error_response(&e)
            }
        }
    }
    .instrument(span)
    .await
}

fn is_remote(source: &str) -> bool {
    let lower = source.trim_start_matches('/').to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:")
}

fn image_response(
    image: ImageResponse,
    cache_control: &HeaderValue,
    if_none_match: Option<&HeaderValue>,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, cache_control.clone());
    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(image.cache_status.as_header()),
    );

    let etag = image
        .etag
        .as_deref()
        .and_then(|tag| HeaderValue::from_str(tag).ok());
    if let Some(tag) = &etag {
        headers.insert(ETAG, tag.clone());
        if if_none_match.is_some_and(|candidates| etag_matches(candidates, tag)) {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(image.content_type));
    let body = match image.body {
        ImageBody::Cached(stream) => Body::from_stream(stream),
        ImageBody::Rendered(data) => Body::from(data),
    };
    (StatusCode::OK, headers, body).into_response()
}

/// Weak comparison of an `If-None-Match` list against the current tag
fn etag_matches(candidates: &HeaderValue, current: &HeaderValue) -> bool {
    let (Ok(candidates), Ok(current)) = (candidates.to_str(), current.to_str()) else {
        return false;
    };
    let current = current.trim_start_matches("W/");
    candidates
        .split(',')
        .map(str::trim)
        .any(|c| c == "*" || c.trim_start_matches("W/") == current)
}

fn error_response(err: &IpxError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        status_code: status.as_u16(),
        status_message: err.public_message(),
    };
    (status, Json(body)).into_response()
}
