use crate::auth::PrincipalResolver;
use crate::consultation::ConsultationStore;
use crate::ingest::IngestionService;
use crate::storage::StorageResolver;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: ConsultationStore,
    pub resolver: StorageResolver,
    pub ingestion: IngestionService,

    /// Bearer token → principal
    pub principals: Arc<dyn PrincipalResolver>,

    /// Include error detail in 500 responses (development mode only)
    pub expose_error_detail: bool,
}

impl AppState {
    pub fn new(ingestion: IngestionService, principals: Arc<dyn PrincipalResolver>) -> Self {
        Self {
            store: ingestion.store().clone(),
            resolver: ingestion.resolver().clone(),
            ingestion,
            principals,
            expose_error_detail: false,
        }
    }

    pub fn with_error_detail(mut self, expose: bool) -> Self {
        self.expose_error_detail = expose;
        self
    }
}
