use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Scalar fields a listing can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Date,
    PatientName,
    DoctorName,
    UhidId,
    AttenderName,
    IcuConsultantName,
    RecordingDuration,
    Status,
    CreatedAt,
}

impl SortField {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "date" => Ok(Self::Date),
            "patientName" => Ok(Self::PatientName),
            "doctorName" => Ok(Self::DoctorName),
            "uhidId" => Ok(Self::UhidId),
            "attenderName" => Ok(Self::AttenderName),
            "icuConsultantName" => Ok(Self::IcuConsultantName),
            "recordingDuration" => Ok(Self::RecordingDuration),
            "status" => Ok(Self::Status),
            "createdAt" => Ok(Self::CreatedAt),
            other => Err(Error::validation(format!("Cannot sort by {other}"))),
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::PatientName => "patient_name",
            Self::DoctorName => "doctor_name",
            Self::UhidId => "uhid_id",
            Self::AttenderName => "attender_name",
            Self::IcuConsultantName => "icu_consultant_name",
            Self::RecordingDuration => "recording_duration",
            Self::Status => "status",
            Self::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(order: &str) -> Result<Self> {
        match order.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            other => Err(Error::validation(format!("Unknown sort order: {other}"))),
        }
    }

    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Typed listing request
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Inclusive lower bound on `date`
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `date`
    pub date_to: Option<DateTime<Utc>>,
    pub patient_name: Option<String>,
    pub doctor_name: Option<String>,
    pub uhid_id: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            patient_name: None,
            doctor_name: None,
            uhid_id: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ListQuery {
    /// `limit` is capped at [`MAX_LIMIT`]
    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit.min(MAX_LIMIT);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn sorted(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.sort_order = order;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::validation("page must be at least 1"));
        }
        if self.limit == 0 {
            return Err(Error::validation("limit must be at least 1"));
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(Error::validation("dateFrom must not be after dateTo"));
            }
        }
        Ok(())
    }
}

/// Query-string form of [`ListQuery`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub patient_name: Option<String>,
    pub doctor_name: Option<String>,
    pub uhid_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TryFrom<ListParams> for ListQuery {
    type Error = Error;

    fn try_from(params: ListParams) -> Result<Self> {
        let query = ListQuery {
            date_from: non_blank(params.date_from)
                .map(|d| parse_bound(&d, false))
                .transpose()?,
            date_to: non_blank(params.date_to)
                .map(|d| parse_bound(&d, true))
                .transpose()?,
            patient_name: non_blank(params.patient_name),
            doctor_name: non_blank(params.doctor_name),
            uhid_id: non_blank(params.uhid_id),
            sort_by: non_blank(params.sort_by)
                .map(|s| SortField::parse(&s))
                .transpose()?
                .unwrap_or_default(),
            sort_order: non_blank(params.sort_order)
                .map(|s| SortOrder::parse(&s))
                .transpose()?
                .unwrap_or_default(),
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
        };
        query.validate()?;
        Ok(query)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// RFC 3339 timestamp, or a plain date meaning the start (or end) of that day
fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("Invalid date: {value}")))?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };

    time.map(|t| t.and_utc())
        .ok_or_else(|| Error::validation(format!("Invalid date: {value}")))
}

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    /// Matching records across all pages
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = total.div_ceil(u64::from(limit.max(1)));
        Self {
            data,
            total,
            page,
            limit,
            total_pages,
        }
    }
}
