use super::extract::{JsonBody, QueryParams};
use super::state::AppState;
use crate::auth::Principal;
use crate::client::ARTIFACT_FIELD;
use crate::consultation::{Consultation, ConsultationPatch, ListParams, ListQuery, NewConsultation, Page};
use crate::error::{Error, Result};
use crate::ingest::{ArtifactUpload, StoredArtifact};
use crate::retrieval::locate_artifact;
use crate::storage::{StorageSettings, StorageUpdate};
use axum::{
    extract::{Multipart, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub message: String,
    pub consultation: Consultation,
}

#[derive(Debug, Serialize)]
pub struct StorageUpdatedResponse {
    pub message: String,
    pub settings: StorageSettings,
}

#[derive(Debug, Serialize)]
pub struct OrphansResponse {
    pub count: usize,
    pub orphans: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// POST /consultations
/// Phase B: record metadata for an uploaded artifact
pub async fn create_consultation(
    State(state): State<AppState>,
    principal: Principal,
    JsonBody(new): JsonBody<NewConsultation>,
) -> Result<(StatusCode, Json<Consultation>)> {
    let consultation = state.ingestion.record_metadata(&principal, new).await?;
    Ok((StatusCode::CREATED, Json(consultation)))
}

/// POST /consultations/retry
/// Phase B again after a partial ingestion
pub async fn retry_consultation(
    State(state): State<AppState>,
    principal: Principal,
    JsonBody(new): JsonBody<NewConsultation>,
) -> Result<Json<Consultation>> {
    let consultation = state.ingestion.retry_metadata(&principal, new).await?;
    Ok(Json(consultation))
}

/// POST /consultations/upload
/// Phase A: store the multipart `videoFile` under the current root
pub async fn upload_artifact(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StoredArtifact>)> {
    let limit = state.resolver.settings().await?.max_size_bytes();

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() != Some(ARTIFACT_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            if (data.len() + chunk.len()) as u64 > limit {
                return Err(Error::validation(format!(
                    "Video exceeds the {} MB upload limit",
                    limit / (1024 * 1024)
                )));
            }
            data.extend_from_slice(&chunk);
        }

        let upload = ArtifactUpload {
            file_name,
            content_type,
            data,
        };
        let stored = state.ingestion.store_artifact(&principal, upload).await?;
        return Ok((StatusCode::CREATED, Json(stored)));
    }

    Err(Error::validation(format!("No {ARTIFACT_FIELD} field in upload")))
}

/// GET /consultations
pub async fn list_consultations(
    State(state): State<AppState>,
    _principal: Principal,
    QueryParams(params): QueryParams<ListParams>,
) -> Result<Json<Page<Consultation>>> {
    let query = ListQuery::try_from(params)?;
    let page = state.store.list(query).await?;
    Ok(Json(page))
}

/// GET /consultations/doctor
pub async fn doctor_consultations(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Consultation>>> {
    let consultations = state.store.list_for_doctor(&principal).await?;
    Ok(Json(consultations))
}

/// GET /consultations/uhid/:uhid_id
pub async fn get_by_uhid(
    State(state): State<AppState>,
    _principal: Principal,
    Path(uhid_id): Path<String>,
) -> Result<Json<Consultation>> {
    let consultation = state.store.get_by_uhid(&uhid_id).await?;
    Ok(Json(consultation))
}

/// GET /consultations/:id
pub async fn get_consultation(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Consultation>> {
    let consultation = state.store.get(parse_id(&id)?).await?;
    Ok(Json(consultation))
}

/// PUT /consultations/:id
pub async fn update_consultation(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    JsonBody(patch): JsonBody<ConsultationPatch>,
) -> Result<Json<Consultation>> {
    let consultation = state.store.update(&principal, parse_id(&id)?, patch).await?;
    Ok(Json(consultation))
}

/// DELETE /consultations/:id
/// Removes the record only; the artifact stays on disk
pub async fn delete_consultation(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>> {
    let consultation = state.store.delete(&principal, parse_id(&id)?).await?;
    Ok(Json(DeletedResponse {
        message: format!("Consultation {} deleted", consultation.id),
        consultation,
    }))
}

/// GET /storage-path
pub async fn get_storage_path(
    State(state): State<AppState>,
    _principal: Principal,
) -> Result<Json<StorageSettings>> {
    state.resolver.resolve().await?;
    let settings = state.resolver.settings().await?;
    Ok(Json(settings))
}

/// POST /storage-path
pub async fn update_storage_path(
    State(state): State<AppState>,
    principal: Principal,
    JsonBody(update): JsonBody<StorageUpdate>,
) -> Result<Json<StorageUpdatedResponse>> {
    let settings = state.resolver.update(&principal, update).await?;
    Ok(Json(StorageUpdatedResponse {
        message: format!("Storage path updated to {}", settings.path.display()),
        settings,
    }))
}

/// GET /storage/orphans
pub async fn list_orphans(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<OrphansResponse>> {
    let orphans = state.ingestion.orphaned_artifacts(&principal).await?;
    Ok(Json(OrphansResponse {
        count: orphans.len(),
        orphans,
    }))
}

/// GET /videos/:filename
/// Stream an artifact from the current storage root (range requests supported)
pub async fn serve_video(
    State(state): State<AppState>,
    _principal: Principal,
    Path(filename): Path<String>,
    request: Request,
) -> Result<Response> {
    let path = locate_artifact(&state.resolver, &filename).await?;

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => Ok(response.into_response()),
        Err(never) => match never {},
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| Error::validation(format!("Invalid consultation id: {id}")))
}

fn malformed(error: axum::extract::multipart::MultipartError) -> Error {
    Error::validation(format!("Malformed upload: {error}"))
}
