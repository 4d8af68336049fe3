use super::device::MediaFragment;
use crate::ingest::{extension_for, media_essence, sanitize_file_name};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

/// Append-only fragment sequence for one session
#[derive(Debug, Default)]
pub struct FragmentBuffer {
    fragments: Vec<MediaFragment>,
    total_bytes: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment; empty fragments are dropped
    pub fn push(&mut self, fragment: MediaFragment) -> bool {
        if fragment.data.is_empty() {
            return false;
        }
        self.total_bytes += fragment.data.len();
        self.fragments.push(fragment);
        true
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

/// The finished recording handed to the ingestion transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub fragment_count: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssembleError {
    #[error("No data captured")]
    NoData,
}

/// Concatenates fragments into one artifact
pub struct MediaAssembler;

impl MediaAssembler {
    /// Join the fragments in insertion order
    pub fn assemble(
        buffer: FragmentBuffer,
        uhid_id: &str,
        started_at: DateTime<Utc>,
        mime_type: &str,
    ) -> Result<Artifact, AssembleError> {
        if buffer.is_empty() {
            return Err(AssembleError::NoData);
        }

        let content_type = media_essence(mime_type).unwrap_or_else(|_| "video/webm".to_string());
        let file_name = Self::file_name(uhid_id, started_at, &extension_for(&content_type));

        let fragment_count = buffer.len();
        let mut data = Vec::with_capacity(buffer.total_bytes);
        for fragment in buffer.fragments {
            data.extend_from_slice(&fragment.data);
        }

        info!(
            "Assembled {} fragments into {} ({} bytes)",
            fragment_count,
            file_name,
            data.len()
        );

        Ok(Artifact {
            file_name,
            content_type,
            data,
            fragment_count,
        })
    }

    /// `consultation_<start millis>_<uhid>.<ext>`
    pub fn file_name(uhid_id: &str, started_at: DateTime<Utc>, extension: &str) -> String {
        let uhid = sanitize_file_name(uhid_id).unwrap_or_else(|| "unknown".to_string());
        format!(
            "consultation_{}_{}.{}",
            started_at.timestamp_millis(),
            uhid,
            extension
        )
    }
}
