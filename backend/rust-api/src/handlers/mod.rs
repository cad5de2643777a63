use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::error::QuizError;
use crate::metrics;
use crate::services::AppState;

pub mod history;
pub mod runs;
pub mod sessions;
pub mod sse;
pub mod users;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::Validation(message) => ApiError::BadRequest(message),
            QuizError::NotFound(_) => ApiError::NotFound(err.to_string()),
            QuizError::AlreadyTerminal(_) => ApiError::Conflict(err.to_string()),
            QuizError::Persistence(_) => {
                tracing::error!("{}", err);
                ApiError::Unavailable("Storage is temporarily unavailable, please retry".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16()
            })),
        )
            .into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    let store_health = match state.store.ping().await {
        Ok(()) => json!({ "status": "healthy", "backend": state.store.backend() }),
        Err(e) => {
            all_healthy = false;
            json!({ "status": "unhealthy", "backend": state.store.backend(), "error": e.to_string() })
        }
    };
    dependencies.insert("store".to_string(), store_health);

    let cache_health = match state.cache.ping().await {
        Ok(()) => json!({ "status": "healthy", "backend": state.cache.backend() }),
        Err(e) => {
            all_healthy = false;
            json!({ "status": "unhealthy", "backend": state.cache.backend(), "error": e.to_string() })
        }
    };
    dependencies.insert("cache".to_string(), cache_health);

    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "mathdrill-api",
            "version": env!("CARGO_PKG_VERSION"),
            "ai_enabled": state.config.ai.enabled,
            "active_countdowns": state.sessions.countdowns().active_count(),
            "dependencies": dependencies
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic auth against `username:password` from
/// configuration.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if credentials != state.config.metrics_auth {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
