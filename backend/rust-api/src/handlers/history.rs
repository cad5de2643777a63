use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::models::history::ListQuery;
use crate::services::AppState;

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.history.history(query.resolved_limit()).await?;
    Ok(Json(entries))
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state.history.leaderboard(query.resolved_limit()).await?;
    Ok(Json(entries))
}
