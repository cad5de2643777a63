use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};

use crate::handlers::ApiError;

/// JSON body extractor whose rejections use the API's error shape, so a
/// malformed answer payload reads like any other validation failure.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(rejection_to_error(rejection)),
        }
    }
}

fn rejection_to_error(rejection: JsonRejection) -> ApiError {
    let message = match &rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Expected request with `Content-Type: application/json`".to_string()
        }
        _ => format!("Failed to parse JSON request body: {}", rejection.body_text()),
    };
    tracing::warn!("{}", message);
    ApiError::BadRequest(message)
}
