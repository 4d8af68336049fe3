use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, PathBuf};

/// The singleton storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Absolute storage root
    pub path: PathBuf,

    /// Advisory ceiling for a single artifact, in MB
    pub max_size_mb: u64,

    /// Accepted media extensions, lower-case, without the dot
    pub allowed_types: Vec<String>,

    pub last_updated: DateTime<Utc>,
}

impl StorageSettings {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self.allowed_types.iter().any(|t| *t == extension)
    }
}

/// Values used when the configuration row is created lazily
#[derive(Debug, Clone, Deserialize)]
pub struct StorageDefaults {
    pub default_path: String,
    pub max_size_mb: u64,
    pub allowed_types: Vec<String>,
}

impl Default for StorageDefaults {
    fn default() -> Self {
        Self {
            default_path: "recordings".to_string(),
            max_size_mb: 1024,
            allowed_types: vec!["webm".to_string(), "mp4".to_string()],
        }
    }
}

/// Admin request to reconfigure the storage root
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUpdate {
    #[serde(alias = "newStoragePath")]
    pub path: String,

    pub max_size_mb: Option<u64>,

    pub allowed_types: Option<Vec<String>>,
}

impl StorageUpdate {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Expand `~`, make absolute against the working directory and drop `.`/`..`
pub fn normalize_path(raw: &str) -> Result<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::validation("Storage path is required"));
    }

    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Storage(format!("Cannot determine working directory: {e}")))?;
        cwd.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    Ok(normalized)
}

/// Lower-case, dot-free, de-duplicated extension list
pub fn normalize_types(types: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::new();
    for t in types {
        let t = t.trim().trim_start_matches('.').to_ascii_lowercase();
        if !t.is_empty() && !normalized.contains(&t) {
            normalized.push(t);
        }
    }

    if normalized.is_empty() {
        return Err(Error::validation("At least one allowed media type is required"));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_absolute_path() {
        let path = normalize_path("/srv/videos/./2024/../current").unwrap();
        assert_eq!(path, PathBuf::from("/srv/videos/current"));
    }

    #[test]
    fn test_normalize_relative_path_is_absolute() {
        let path = normalize_path("videos").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("videos"));
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert!(matches!(normalize_path("   "), Err(Error::Validation(_))));
    }

    #[test]
    fn test_normalize_types() {
        let types = normalize_types(&[".WEBM".into(), "mp4".into(), "webm".into()]).unwrap();
        assert_eq!(types, vec!["webm".to_string(), "mp4".to_string()]);
        assert!(normalize_types(&[" ".into()]).is_err());
    }
}
