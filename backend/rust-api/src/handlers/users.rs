use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::user::FindOrCreateUserRequest;
use crate::services::AppState;

pub async fn find_or_create_user(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<FindOrCreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.users.find_or_create(req).await?;
    Ok(Json(user))
}
