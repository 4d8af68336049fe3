//! HTTP API server
//!
//! - POST /consultations/upload - Phase A: store a recorded artifact
//! - POST /consultations - Phase B: record consultation metadata
//! - POST /consultations/retry - Phase B retry after a partial ingestion
//! - GET /consultations - Filtered, sorted, paginated listing
//! - GET|PUT|DELETE /consultations/:id - Single consultation
//! - GET|POST /storage-path - Storage root
//! - GET /videos/:filename - Artifact playback
//! - GET /health - Health check

mod errors;
mod extract;
mod handlers;
mod routes;
mod state;

pub use errors::ErrorResponse;
pub use routes::create_router;
pub use state::AppState;
