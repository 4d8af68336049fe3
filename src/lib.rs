pub mod auth;
pub mod capture;
pub mod client;
pub mod config;
pub mod consultation;
pub mod db;
pub mod error;
pub mod http;
pub mod ingest;
pub mod retrieval;
pub mod storage;

pub use auth::{Principal, PrincipalId, PrincipalResolver, Role, StaticTokens, TokenGrant};
pub use capture::{
    Artifact, CaptureConfig, CaptureController, CaptureDevice, CaptureError, CaptureFailure,
    ChannelDevice, ConsultationForm, FragmentSink, FragmentSinks, MediaAssembler, MediaFragment,
    SessionState,
};
pub use client::{HttpIngestionClient, IngestionClient, LocalIngestion};
pub use config::Config;
pub use consultation::{
    Consultation, ConsultationPatch, ConsultationStatus, ConsultationStore, ListQuery,
    NewConsultation, Page,
};
pub use db::Database;
pub use error::{AuthError, Error, Result};
pub use http::{create_router, AppState};
pub use ingest::{ArtifactUpload, IngestionService, IngestionTimeouts, StoredArtifact};
pub use retrieval::locate_artifact;
pub use storage::{StorageDefaults, StorageResolver, StorageSettings, StorageUpdate};
