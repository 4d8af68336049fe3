use super::errors;
use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Ingestion
        .route(
            "/consultations",
            post(handlers::create_consultation).get(handlers::list_consultations),
        )
        .route(
            "/consultations/upload",
            // Size is capped while streaming, against the configured limit
            post(handlers::upload_artifact).layer(DefaultBodyLimit::disable()),
        )
        .route("/consultations/retry", post(handlers::retry_consultation))
        // Consultation queries
        .route("/consultations/doctor", get(handlers::doctor_consultations))
        .route("/consultations/uhid/:uhid_id", get(handlers::get_by_uhid))
        .route(
            "/consultations/:id",
            get(handlers::get_consultation)
                .put(handlers::update_consultation)
                .delete(handlers::delete_consultation),
        )
        // Storage configuration
        .route(
            "/storage-path",
            get(handlers::get_storage_path).post(handlers::update_storage_path),
        )
        .route("/storage/orphans", get(handlers::list_orphans))
        // Playback
        .route("/videos/:filename", get(handlers::serve_video))
        .layer(middleware::map_response_with_state(
            state.clone(),
            errors::expose_error_detail,
        ))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
