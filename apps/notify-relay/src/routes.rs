use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/notifications/:username", post(handlers::post_notification))
        .route(
            "/notifications/:username/pending",
            get(handlers::pending_count),
        )
        .route("/ws", get(handlers::websocket_by_query))
        .route("/ws/", get(handlers::websocket_by_query))
        .route("/ws/:username", get(handlers::websocket_by_path))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
