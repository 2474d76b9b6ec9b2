use axum::{routing::get, Router};
use std::time::Duration;
use tower_http::{cors::{Any, CorsLayer}, timeout::TimeoutLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/matches", get(handlers::get_matches))
        .route("/api/predictions", get(handlers::get_predictions))
        .route("/api/metrics", get(handlers::get_metrics))
        .route("/api/models", get(handlers::get_models))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
