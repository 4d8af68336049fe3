//! Ingestion transport (server side)
//!
//! - Phase A: artifact write under the current storage root
//! - Phase B: consultation metadata record
//! - Phase B retry keyed by UHID and artifact name
//! - Orphan sweep for artifacts that never got (or lost) their record

mod artifact;
mod service;

pub use artifact::{
    extension_for, media_essence, sanitize_file_name, validate_artifact_name, ArtifactUpload,
    StoredArtifact,
};
pub use service::{IngestionService, IngestionTimeouts};
