use crate::consultation::NewConsultation;
use serde::{Deserialize, Serialize};

/// Form fields bound to a session before capture starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationForm {
    pub patient_name: String,
    pub uhid_id: String,
    pub attender_name: String,
    pub icu_consultant_name: String,
    pub doctor_name: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ConsultationForm {
    /// Required fields that are blank after trimming, in form order
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("patientName", &self.patient_name),
            ("uhidId", &self.uhid_id),
            ("attenderName", &self.attender_name),
            ("icuConsultantName", &self.icu_consultant_name),
            ("doctorName", &self.doctor_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn trimmed(&self) -> Self {
        Self {
            patient_name: self.patient_name.trim().to_string(),
            uhid_id: self.uhid_id.trim().to_string(),
            attender_name: self.attender_name.trim().to_string(),
            icu_consultant_name: self.icu_consultant_name.trim().to_string(),
            doctor_name: self.doctor_name.trim().to_string(),
            notes: self
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        }
    }

    /// Metadata record for Phase B
    pub fn to_record(&self, video_file_name: &str, recording_duration: u64) -> NewConsultation {
        NewConsultation {
            patient_name: self.patient_name.clone(),
            uhid_id: self.uhid_id.clone(),
            doctor_name: self.doctor_name.clone(),
            attender_name: self.attender_name.clone(),
            icu_consultant_name: self.icu_consultant_name.clone(),
            video_file_name: video_file_name.to_string(),
            date: None,
            recording_duration: i64::try_from(recording_duration).unwrap_or(i64::MAX),
            notes: self.notes.clone(),
        }
    }
}
