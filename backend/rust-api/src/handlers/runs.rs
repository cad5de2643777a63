use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::models::history::FinishRunRequest;
use crate::services::AppState;

pub async fn get_tally(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.sessions.get_tally(&run_id).await?;
    Ok(Json(view))
}

pub async fn reset_tally(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.tally().reset(&run_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The body is optional; an empty one finishes the run anonymously.
pub async fn finish_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: FinishRunRequest = if body.is_empty() {
        FinishRunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::BadRequest(format!("Failed to parse JSON request body: {}", e))
        })?
    };

    let entry = state.sessions.tally().finish(&run_id, req.user_id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
