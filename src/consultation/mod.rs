//! Consultation metadata store
//!
//! Records are created by ingestion Phase B, listed for reporting, looked up
//! by UHID for continuity of care, and modified only by their owner or an
//! admin.

mod model;
mod query;
mod store;

pub use model::{Consultation, ConsultationPatch, ConsultationStatus, NewConsultation};
pub use query::{ListParams, ListQuery, Page, SortField, SortOrder, DEFAULT_LIMIT, MAX_LIMIT};
pub use store::ConsultationStore;
