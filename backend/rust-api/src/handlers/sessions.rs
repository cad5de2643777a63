use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::answer::SubmitAnswerRequest;
use crate::models::StartSessionRequest;
use crate::services::AppState;

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<StartSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Starting session: operation={}, difficulty={}, run_id={:?}",
        req.operation,
        req.difficulty,
        req.run_id
    );

    let response = state.sessions.start_session(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.sessions.session_view(&session_id).await?;
    Ok(Json(view))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Submitting answer for session: {}", session_id);

    let response = state.sessions.submit_answer(&session_id, req).await?;
    Ok(Json(response))
}

pub async fn expire_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Client expired session: {}", session_id);

    let response = state.sessions.expire_session(&session_id).await?;
    Ok(Json(response))
}

pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Abandoning session: {}", session_id);

    let view = state.sessions.abandon_session(&session_id).await?;
    Ok(Json(view))
}

pub async fn get_solution(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let solution = state.sessions.get_solution(&session_id).await?;
    Ok(Json(solution))
}
