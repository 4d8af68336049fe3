use super::IngestionClient;
use crate::auth::Principal;
use crate::capture::Artifact;
use crate::consultation::{Consultation, NewConsultation};
use crate::error::Result;
use crate::ingest::{ArtifactUpload, IngestionService, StoredArtifact};

/// In-process transport acting as a fixed principal
#[derive(Clone)]
pub struct LocalIngestion {
    service: IngestionService,
    principal: Principal,
}

impl LocalIngestion {
    pub fn new(service: IngestionService, principal: Principal) -> Self {
        Self { service, principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

#[async_trait::async_trait]
impl IngestionClient for LocalIngestion {
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact> {
        let upload = ArtifactUpload {
            file_name: Some(artifact.file_name.clone()),
            content_type: artifact.content_type.clone(),
            data: artifact.data.clone(),
        };
        self.service.store_artifact(&self.principal, upload).await
    }

    async fn create(&self, record: &NewConsultation) -> Result<Consultation> {
        self.service
            .record_metadata(&self.principal, record.clone())
            .await
    }

    async fn retry_create(&self, record: &NewConsultation) -> Result<Consultation> {
        self.service
            .retry_metadata(&self.principal, record.clone())
            .await
    }
}
