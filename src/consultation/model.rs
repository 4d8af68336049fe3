use crate::auth::PrincipalId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a consultation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsultationStatus {
    Pending,
    Completed,
    Cancelled,
}

impl ConsultationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `completed` never reverts to `pending`; `cancelled` is terminal
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (a, b) if a == b => true,
            (Self::Pending, _) => true,
            (Self::Completed, Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsultationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::validation(format!("Unknown status: {other}"))),
        }
    }
}

/// Durable record of one recorded patient encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: Uuid,
    pub uhid_id: String,
    pub patient_name: String,
    /// Creating principal
    pub doctor: PrincipalId,
    pub doctor_name: String,
    pub attender_name: String,
    pub icu_consultant_name: String,
    /// Artifact name within the storage root at creation time
    pub video_file_name: String,
    pub date: DateTime<Utc>,
    /// Seconds
    pub recording_duration: u64,
    pub status: ConsultationStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of a create request (ingestion Phase B)
///
/// Ownership is not part of the payload; it always comes from the
/// authenticated principal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsultation {
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub uhid_id: String,
    #[serde(default)]
    pub doctor_name: String,
    #[serde(default)]
    pub attender_name: String,
    #[serde(default)]
    pub icu_consultant_name: String,
    #[serde(default)]
    pub video_file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recording_duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewConsultation {
    /// Trim every text field and check the required ones
    pub fn normalized(mut self) -> Result<Self> {
        trim_in_place(&mut self.patient_name);
        trim_in_place(&mut self.uhid_id);
        trim_in_place(&mut self.doctor_name);
        trim_in_place(&mut self.attender_name);
        trim_in_place(&mut self.icu_consultant_name);
        trim_in_place(&mut self.video_file_name);
        self.notes = normalize_notes(self.notes.take());

        check_required(&[
            ("patientName", &self.patient_name),
            ("uhidId", &self.uhid_id),
            ("doctorName", &self.doctor_name),
            ("attenderName", &self.attender_name),
            ("icuConsultantName", &self.icu_consultant_name),
            ("videoFileName", &self.video_file_name),
        ])?;

        if self.recording_duration < 0 {
            return Err(Error::validation("recordingDuration must not be negative"));
        }

        Ok(self)
    }

    /// Check the fields bound before an artifact exists (all but `videoFileName`)
    pub fn validate_form(&self) -> Result<()> {
        check_required(&[
            ("patientName", &self.patient_name.trim().to_string()),
            ("uhidId", &self.uhid_id.trim().to_string()),
            ("doctorName", &self.doctor_name.trim().to_string()),
            ("attenderName", &self.attender_name.trim().to_string()),
            ("icuConsultantName", &self.icu_consultant_name.trim().to_string()),
        ])?;

        if self.recording_duration < 0 {
            return Err(Error::validation("recordingDuration must not be negative"));
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationPatch {
    pub patient_name: Option<String>,
    pub uhid_id: Option<String>,
    pub doctor_name: Option<String>,
    pub attender_name: Option<String>,
    pub icu_consultant_name: Option<String>,
    pub video_file_name: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub recording_duration: Option<i64>,
    pub status: Option<ConsultationStatus>,
    pub notes: Option<String>,
}

impl Consultation {
    /// Apply `patch` and re-run the creation validations
    ///
    /// `videoFileName` is bound to the artifact confirmed at creation; a patch
    /// may repeat it but not point it elsewhere.
    pub fn apply(&mut self, patch: ConsultationPatch) -> Result<()> {
        if let Some(name) = &patch.video_file_name {
            if name.trim() != self.video_file_name {
                return Err(Error::validation(
                    "videoFileName cannot be changed after the video is stored",
                ));
            }
        }

        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(Error::validation(format!(
                    "Status cannot change from {} to {}",
                    self.status, status
                )));
            }
            self.status = status;
        }

        if let Some(duration) = patch.recording_duration {
            if duration < 0 {
                return Err(Error::validation("recordingDuration must not be negative"));
            }
            self.recording_duration = duration as u64;
        }

        let fields = [
            (&mut self.patient_name, patch.patient_name),
            (&mut self.uhid_id, patch.uhid_id),
            (&mut self.doctor_name, patch.doctor_name),
            (&mut self.attender_name, patch.attender_name),
            (&mut self.icu_consultant_name, patch.icu_consultant_name),
        ];
        for (field, value) in fields {
            if let Some(value) = value {
                *field = value.trim().to_string();
            }
        }

        if let Some(date) = patch.date {
            self.date = date;
        }

        if patch.notes.is_some() {
            self.notes = normalize_notes(patch.notes);
        }

        check_required(&[
            ("patientName", &self.patient_name),
            ("uhidId", &self.uhid_id),
            ("doctorName", &self.doctor_name),
            ("attenderName", &self.attender_name),
            ("icuConsultantName", &self.icu_consultant_name),
            ("videoFileName", &self.video_file_name),
        ])
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

fn check_required(fields: &[(&str, &String)]) -> Result<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}
