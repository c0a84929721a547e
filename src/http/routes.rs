use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/sessions/record/start", post(handlers::start_recording))
        .route(
            "/sessions/record/stop/:session_id",
            post(handlers::stop_recording),
        )
        .route("/sessions/:session_id/save", post(handlers::save_recording))
        // Session queries
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        // Offline playback
        .route("/lectures/:lecture_id/audio", get(handlers::resolve_audio))
        .route(
            "/lectures/:lecture_id/offline",
            post(handlers::save_for_offline),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
