use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::QuizError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .route("/api/v1/sessions", post(handlers::sessions::create_session))
        .nest("/api/v1/sessions", sessions_routes())
        .nest("/api/v1/runs", runs_routes())
        .route("/api/v1/history", get(handlers::history::get_history))
        .route("/api/v1/leaderboard", get(handlers::history::get_leaderboard))
        .route("/api/v1/users", post(handlers::users::find_or_create_user))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(handlers::sessions::get_session))
        .route("/{id}/answers", post(handlers::sessions::submit_answer))
        .route("/{id}/expire", post(handlers::sessions::expire_session))
        .route("/{id}/abandon", post(handlers::sessions::abandon_session))
        .route("/{id}/solution", get(handlers::sessions::get_solution))
        .route("/{id}/stream", get(handlers::sse::session_stream))
}

fn runs_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{run_id}/tally",
            get(handlers::runs::get_tally).delete(handlers::runs::reset_tally),
        )
        .route("/{run_id}/finish", post(handlers::runs::finish_run))
}
