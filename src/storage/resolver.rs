use super::settings::{normalize_path, normalize_types, StorageDefaults, StorageSettings, StorageUpdate};
use crate::auth::Principal;
use crate::db::{from_millis, to_millis, truncate_millis, Database};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Resolves the storage root for every write and every serve
///
/// Nothing is memoized: each call reads the persisted configuration, so an
/// admin reconfiguration is observed by the next operation without a restart.
/// A write that resolved the root before a reconfiguration may still land in
/// the old location.
#[derive(Clone)]
pub struct StorageResolver {
    db: Database,
    defaults: StorageDefaults,
}

impl StorageResolver {
    pub fn new(db: Database, defaults: StorageDefaults) -> Self {
        Self { db, defaults }
    }

    /// Current configuration, creating the default row on first access
    pub async fn settings(&self) -> Result<StorageSettings> {
        if let Some(settings) = self.load().await? {
            return Ok(settings);
        }

        let defaults = StorageSettings {
            path: normalize_path(&self.defaults.default_path)?,
            max_size_mb: self.defaults.max_size_mb,
            allowed_types: normalize_types(&self.defaults.allowed_types)?,
            last_updated: truncate_millis(Utc::now()),
        };

        info!(
            "No storage configuration found, using default root {}",
            defaults.path.display()
        );

        // OR IGNORE: a concurrent first access may have inserted already
        self.persist(defaults, false).await?;

        self.load()
            .await?
            .ok_or_else(|| Error::Server(anyhow::anyhow!("Storage configuration missing after insert")))
    }

    /// Absolute directory the next write should land in; created if missing
    pub async fn resolve(&self) -> Result<PathBuf> {
        let settings = self.settings().await?;
        ensure_directory(&settings.path).await?;
        Ok(settings.path)
    }

    /// Reconfigure the storage root (admin only)
    ///
    /// The new directory is created and checked for writability before it is
    /// persisted; on any failure the previous configuration stays in effect.
    pub async fn update(&self, principal: &Principal, update: StorageUpdate) -> Result<StorageSettings> {
        principal.require_admin("Changing the storage path")?;

        let path = normalize_path(&update.path)?;

        if update.max_size_mb == Some(0) {
            return Err(Error::validation("maxSize must be greater than zero"));
        }

        let allowed_types = match &update.allowed_types {
            Some(types) => Some(normalize_types(types)?),
            None => None,
        };

        let current = self.settings().await?;

        ensure_directory(&path).await?;
        check_writable(&path).await?;

        let updated = StorageSettings {
            path,
            max_size_mb: update.max_size_mb.unwrap_or(current.max_size_mb),
            allowed_types: allowed_types.unwrap_or_else(|| current.allowed_types.clone()),
            last_updated: truncate_millis(Utc::now()),
        };

        self.persist(updated.clone(), true).await?;

        info!(
            "Storage root changed by {}: {} -> {}",
            principal.id,
            current.path.display(),
            updated.path.display()
        );

        Ok(updated)
    }

    async fn load(&self) -> Result<Option<StorageSettings>> {
        self.db
            .call(|conn| {
                let row = conn
                    .query_row(
                        "SELECT path, max_size_mb, allowed_types, last_updated
                         FROM storage_settings WHERE id = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, i64>(3)?,
                            ))
                        },
                    )
                    .optional()?;

                let Some((path, max_size_mb, allowed_types, last_updated)) = row else {
                    return Ok(None);
                };

                let allowed_types: Vec<String> = serde_json::from_str(&allowed_types)
                    .map_err(|e| Error::Server(anyhow::Error::new(e).context("Corrupt allowed_types")))?;

                Ok(Some(StorageSettings {
                    path: PathBuf::from(path),
                    max_size_mb: u64::try_from(max_size_mb).unwrap_or_default(),
                    allowed_types,
                    last_updated: from_millis(last_updated),
                }))
            })
            .await
    }

    async fn persist(&self, settings: StorageSettings, replace: bool) -> Result<()> {
        let allowed_types = serde_json::to_string(&settings.allowed_types)
            .map_err(|e| Error::Server(e.into()))?;
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT OR IGNORE" };

        self.db
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "{verb} INTO storage_settings (id, path, max_size_mb, allowed_types, last_updated)
                         VALUES (1, ?1, ?2, ?3, ?4)"
                    ),
                    params![
                        settings.path.to_string_lossy(),
                        i64::try_from(settings.max_size_mb).unwrap_or(i64::MAX),
                        allowed_types,
                        to_millis(&settings.last_updated),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

/// Create `path` recursively and make sure it is a directory
pub(crate) async fn ensure_directory(path: &Path) -> Result<()> {
    if let Err(e) = tokio::fs::create_dir_all(path).await {
        error!("Cannot create storage root {}: {}", path.display(), e);
        return Err(Error::Storage(format!(
            "Cannot create storage root {}: {e}",
            path.display()
        )));
    }

    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::Storage(format!(
            "Storage root {} is not a directory",
            path.display()
        ))),
        Err(e) => Err(Error::Storage(format!(
            "Storage root {} is unreachable: {e}",
            path.display()
        ))),
    }
}

async fn check_writable(path: &Path) -> Result<()> {
    let marker = path.join(format!(".write-check-{}", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&marker, b"").await {
        error!("Storage root {} is not writable: {}", path.display(), e);
        return Err(Error::Storage(format!(
            "Storage root {} is not writable: {e}",
            path.display()
        )));
    }

    if let Err(e) = tokio::fs::remove_file(&marker).await {
        warn!("Failed to remove write check file {}: {}", marker.display(), e);
    }
    Ok(())
}
