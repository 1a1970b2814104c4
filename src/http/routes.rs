use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recorder control
        .route("/recorder/start", post(handlers::start_recording))
        .route("/recorder/stop", post(handlers::stop_recording))
        .route("/recorder/force-stop", post(handlers::force_stop_recording))
        .route("/recorder/resume", post(handlers::resume_recording))
        .route("/recorder/discard", post(handlers::discard_interrupted))
        .route("/recorder/state", get(handlers::recorder_state))
        .route("/recorder/levels", get(handlers::recorder_levels))
        // Device capability
        .route("/devices", get(handlers::list_devices))
        // Meeting queries
        .route("/meetings", get(handlers::list_meetings))
        .route(
            "/meetings/:meeting_id",
            get(handlers::get_meeting).delete(handlers::delete_meeting),
        )
        .route(
            "/meetings/:meeting_id/audio",
            delete(handlers::delete_meeting_audio),
        )
        // Sync
        .route("/meetings/:meeting_id/sync", post(handlers::sync_meeting))
        .route("/meetings/sync", post(handlers::sync_all))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
