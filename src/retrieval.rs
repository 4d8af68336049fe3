//! Serving stored artifacts from the current storage root

use crate::error::{Error, Result};
use crate::ingest::validate_artifact_name;
use crate::storage::StorageResolver;
use std::path::PathBuf;
use tracing::debug;

/// Absolute path of `file_name` under the *current* storage root
///
/// `Storage` means the root itself is misconfigured or unreachable;
/// `NotFound` means the root is fine but holds no such artifact (for example
/// because the root was moved after the consultation was recorded).
pub async fn locate_artifact(resolver: &StorageResolver, file_name: &str) -> Result<PathBuf> {
    validate_artifact_name(file_name)?;

    let root = resolver.resolve().await?;
    let path = root.join(file_name);

    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {
            debug!("Serving artifact {}", path.display());
            Ok(path)
        }
        Ok(_) => Err(Error::not_found(format!("Video {file_name} not found"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
            "Video {file_name} not found under the current storage root"
        ))),
        Err(e) => Err(Error::Storage(format!(
            "Cannot read {} from storage root {}: {e}",
            file_name,
            root.display()
        ))),
    }
}
