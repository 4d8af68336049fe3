use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A finished artifact handed to Phase A
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    /// Client-suggested file name, if any
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Phase A result: the artifact is flushed to disk under `file_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub file_name: String,
    pub size: u64,
    pub content_type: String,
}

/// Lower-cased MIME essence; only `video/*` and `audio/*` are accepted
pub fn media_essence(content_type: &str) -> Result<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.starts_with("video/") || essence.starts_with("audio/") {
        Ok(essence)
    } else {
        Err(Error::validation(format!("Not a media file: {content_type}")))
    }
}

/// File extension conventionally used for a media type
pub fn extension_for(essence: &str) -> String {
    let ext = match essence {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" | "audio/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-matroska" => "mkv",
        "video/ogg" | "audio/ogg" => "ogg",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        other => other.rsplit('/').next().unwrap_or("bin"),
    };
    ext.to_string()
}

/// Reduce a client-suggested name to a safe single path component
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut cleaned = cleaned.trim_start_matches('.').to_string();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Names accepted for lookups under the storage root
pub fn validate_artifact_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(Error::validation(format!("Invalid artifact name: {name}")));
    }
    Ok(())
}
