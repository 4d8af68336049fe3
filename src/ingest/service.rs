use super::artifact::{
    extension_for, media_essence, sanitize_file_name, validate_artifact_name, ArtifactUpload,
    StoredArtifact,
};
use crate::auth::Principal;
use crate::consultation::{Consultation, ConsultationStore, NewConsultation};
use crate::error::{Error, Result};
use crate::storage::StorageResolver;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

const NAME_ATTEMPTS: usize = 5;

/// Upper bounds for each ingestion phase
#[derive(Debug, Clone, Copy)]
pub struct IngestionTimeouts {
    pub artifact_write: Duration,
    pub metadata_write: Duration,
}

impl Default for IngestionTimeouts {
    fn default() -> Self {
        Self {
            artifact_write: Duration::from_secs(120),
            metadata_write: Duration::from_secs(10),
        }
    }
}

/// Two-phase handoff from a finished artifact to durable server state
///
/// Phase A writes the artifact under the freshly resolved storage root.
/// Phase B records the metadata and is never attempted unless Phase A
/// confirmed the write. No transaction spans the two; a Phase B failure after
/// a successful Phase A is reported as [`Error::PartialIngestion`].
#[derive(Clone)]
pub struct IngestionService {
    resolver: StorageResolver,
    store: ConsultationStore,
    timeouts: IngestionTimeouts,
}

impl IngestionService {
    pub fn new(resolver: StorageResolver, store: ConsultationStore, timeouts: IngestionTimeouts) -> Self {
        Self {
            resolver,
            store,
            timeouts,
        }
    }

    pub fn resolver(&self) -> &StorageResolver {
        &self.resolver
    }

    pub fn store(&self) -> &ConsultationStore {
        &self.store
    }

    /// Phase A: validate, write and flush the artifact
    pub async fn store_artifact(
        &self,
        principal: &Principal,
        upload: ArtifactUpload,
    ) -> Result<StoredArtifact> {
        let essence = media_essence(&upload.content_type)?;

        if upload.data.is_empty() {
            return Err(Error::validation("Uploaded artifact is empty"));
        }

        let settings = self.resolver.settings().await?;
        if upload.data.len() as u64 > settings.max_size_bytes() {
            return Err(Error::validation(format!(
                "Artifact is {} bytes, over the {} MB limit",
                upload.data.len(),
                settings.max_size_mb
            )));
        }

        let name = self.choose_name(upload.file_name.as_deref(), &essence);
        let extension = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !settings.allows_extension(&extension) {
            return Err(Error::validation(format!(
                "File type .{extension} is not allowed (allowed: {})",
                settings.allowed_types.join(", ")
            )));
        }

        let root = self.resolver.resolve().await?;
        let (file, path, file_name) = reserve_file(&root, &name).await?;

        let written = tokio::time::timeout(
            self.timeouts.artifact_write,
            write_and_flush(file, &upload.data),
        )
        .await;

        let failure = match written {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("Failed to write artifact {}: {e}", path.display())),
            Err(_) => Some(format!(
                "Writing artifact {} timed out after {:?}",
                path.display(),
                self.timeouts.artifact_write
            )),
        };

        if let Some(message) = failure {
            error!("{}", message);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove partial artifact {}: {}", path.display(), e);
            }
            return Err(Error::Storage(message));
        }

        info!(
            "Stored artifact {} ({} bytes) for {} under {}",
            file_name,
            upload.data.len(),
            principal.id,
            root.display()
        );

        Ok(StoredArtifact {
            file_name,
            size: upload.data.len() as u64,
            content_type: essence,
        })
    }

    /// Phase B: record metadata for an artifact already confirmed on disk
    pub async fn record_metadata(
        &self,
        principal: &Principal,
        new: NewConsultation,
    ) -> Result<Consultation> {
        let new = new.normalized()?;
        self.confirm_artifact(&new.video_file_name).await?;

        self.bounded(self.store.create(principal, new)).await
    }

    /// Phase B retry after a partial ingestion
    ///
    /// Idempotent per UHID and artifact: if the record already exists with the
    /// same artifact and owner (an earlier attempt landed but its response was
    /// lost), the existing record is returned instead of a conflict.
    pub async fn retry_metadata(
        &self,
        principal: &Principal,
        new: NewConsultation,
    ) -> Result<Consultation> {
        let new = new.normalized()?;
        self.confirm_artifact(&new.video_file_name).await?;

        let uhid_id = new.uhid_id.clone();
        let video_file_name = new.video_file_name.clone();

        match self.bounded(self.store.create(principal, new)).await {
            Err(Error::Conflict(message)) => {
                let existing = self.store.find_by_uhid(&uhid_id).await?;
                match existing {
                    Some(existing)
                        if existing.video_file_name == video_file_name
                            && existing.doctor == principal.id =>
                    {
                        info!(
                            "Metadata retry for UHID {} matched existing consultation {}",
                            uhid_id, existing.id
                        );
                        Ok(existing)
                    }
                    _ => Err(Error::Conflict(message)),
                }
            }
            other => other,
        }
    }

    /// Phase A then Phase B, in that order
    pub async fn ingest(
        &self,
        principal: &Principal,
        upload: ArtifactUpload,
        mut record: NewConsultation,
    ) -> Result<Consultation> {
        record.validate_form()?;

        let stored = self.store_artifact(principal, upload).await?;
        record.video_file_name = stored.file_name.clone();

        self.record_metadata(principal, record).await.map_err(|e| {
            warn!(
                "Artifact {} stored but metadata was not persisted: {}",
                stored.file_name, e
            );
            Error::PartialIngestion {
                file_name: stored.file_name,
                source: Box::new(e),
            }
        })
    }

    /// Artifacts in the current root that no consultation references
    pub async fn orphaned_artifacts(&self, principal: &Principal) -> Result<Vec<String>> {
        principal.require_admin("Listing orphaned artifacts")?;

        let root = self.resolver.resolve().await?;
        let referenced = self.store.referenced_file_names().await?;

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| Error::Storage(format!("Cannot read storage root {}: {e}", root.display())))?;

        let mut orphans = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("Cannot read storage root {}: {e}", root.display())))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || referenced.contains(&name) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                orphans.push(name);
            }
        }

        orphans.sort();
        info!("Orphan sweep found {} artifacts in {}", orphans.len(), root.display());
        Ok(orphans)
    }

    fn choose_name(&self, suggestion: Option<&str>, essence: &str) -> String {
        let default_ext = extension_for(essence);
        match suggestion.and_then(sanitize_file_name) {
            Some(name) if Path::new(&name).extension().is_some() => name,
            Some(name) => format!("{name}.{default_ext}"),
            None => format!(
                "consultation_{}.{default_ext}",
                Utc::now().timestamp_millis()
            ),
        }
    }

    async fn confirm_artifact(&self, file_name: &str) -> Result<()> {
        validate_artifact_name(file_name)?;

        let root = self.resolver.resolve().await?;
        match tokio::fs::metadata(root.join(file_name)).await {
            Ok(meta) if meta.is_file() => Ok(()),
            _ => Err(Error::validation(format!(
                "Video file {file_name} has not been stored under {}",
                root.display()
            ))),
        }
    }

    async fn bounded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeouts.metadata_write, fut)
            .await
            .map_err(|_| {
                Error::Server(anyhow::anyhow!(
                    "Metadata write timed out after {:?}",
                    self.timeouts.metadata_write
                ))
            })?
    }
}

/// Atomically claim a fresh name under `root`
async fn reserve_file(root: &Path, name: &str) -> Result<(File, PathBuf, String)> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (name.to_string(), String::new()),
    };

    for attempt in 0..NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{stem}-{}{ext}", &suffix[..8])
        };
        let path = root.join(&candidate);

        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((file, path, candidate)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                error!("Cannot create artifact {}: {}", path.display(), e);
                return Err(Error::Storage(format!(
                    "Cannot create artifact in {}: {e}",
                    root.display()
                )));
            }
        }
    }

    Err(Error::Storage(format!("Could not allocate a unique name for {name}")))
}

async fn write_and_flush(mut file: File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}
