//! Ingestion transport as seen from the capture client
//!
//! The controller only talks to [`IngestionClient`]; [`HttpIngestionClient`]
//! speaks to a remote server and [`LocalIngestion`] calls the service
//! in-process.

mod http;
mod local;

pub use http::{HttpIngestionClient, ARTIFACT_FIELD};
pub use local::LocalIngestion;

use crate::capture::Artifact;
use crate::consultation::{Consultation, NewConsultation};
use crate::error::Result;
use crate::ingest::StoredArtifact;

#[async_trait::async_trait]
pub trait IngestionClient: Send + Sync {
    /// Phase A: hand the artifact over and get its stored name back
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact>;

    /// Phase B: record metadata for an uploaded artifact
    async fn create(&self, record: &NewConsultation) -> Result<Consultation>;

    /// Phase B again after a partial ingestion; idempotent per UHID and artifact
    async fn retry_create(&self, record: &NewConsultation) -> Result<Consultation>;
}
