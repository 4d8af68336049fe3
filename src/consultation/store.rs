use super::model::{Consultation, ConsultationPatch, ConsultationStatus, NewConsultation};
use super::query::{ListQuery, Page, MAX_LIMIT};
use crate::auth::{Principal, PrincipalId};
use crate::db::{from_millis, to_millis, truncate_millis, Database, FOLD_CASE};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

const COLUMNS: &str = "id, uhid_id, patient_name, doctor, doctor_name, attender_name, \
     icu_consultant_name, video_file_name, date, recording_duration, status, notes, \
     created_at, updated_at";

/// Persists consultation records
///
/// UHID uniqueness is a unique index in the database; `create` never checks
/// for an existing record before inserting.
#[derive(Clone)]
pub struct ConsultationStore {
    db: Database,
}

impl ConsultationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new record owned by `principal`
    pub async fn create(&self, principal: &Principal, new: NewConsultation) -> Result<Consultation> {
        let new = new.normalized()?;
        let now = truncate_millis(Utc::now());

        let consultation = Consultation {
            id: Uuid::new_v4(),
            uhid_id: new.uhid_id,
            patient_name: new.patient_name,
            doctor: principal.id.clone(),
            doctor_name: new.doctor_name,
            attender_name: new.attender_name,
            icu_consultant_name: new.icu_consultant_name,
            video_file_name: new.video_file_name,
            date: new.date.map(truncate_millis).unwrap_or(now),
            recording_duration: new.recording_duration as u64,
            status: ConsultationStatus::Completed,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };

        let record = consultation.clone();
        self.db
            .call(move |conn| insert(conn, &record).map_err(|e| classify(e, &record.uhid_id)))
            .await?;

        info!(
            "Consultation {} created for UHID {} by {}",
            consultation.id, consultation.uhid_id, consultation.doctor
        );

        Ok(consultation)
    }

    pub async fn get(&self, id: Uuid) -> Result<Consultation> {
        self.db
            .call(move |conn| {
                fetch_by_id(conn, id)?
                    .ok_or_else(|| Error::not_found(format!("Consultation {id} not found")))
            })
            .await
    }

    /// Exact UHID lookup across all doctors
    pub async fn get_by_uhid(&self, uhid_id: &str) -> Result<Consultation> {
        let uhid_id = uhid_id.trim().to_string();
        self.find_by_uhid(&uhid_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("No consultation for UHID {uhid_id}")))
    }

    pub async fn find_by_uhid(&self, uhid_id: &str) -> Result<Option<Consultation>> {
        let uhid_id = uhid_id.to_string();
        self.db
            .call(move |conn| {
                let found = conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM consultations WHERE uhid_id = ?1"),
                        params![uhid_id],
                        read_row,
                    )
                    .optional()?;
                Ok(found)
            })
            .await
    }

    /// Filtered, sorted, paginated listing
    pub async fn list(&self, mut query: ListQuery) -> Result<Page<Consultation>> {
        query.limit = query.limit.min(MAX_LIMIT);
        query.validate()?;

        self.db
            .call(move |conn| {
                let mut clauses: Vec<String> = Vec::new();
                let mut values: Vec<Value> = Vec::new();

                if let Some(from) = query.date_from {
                    values.push(Value::Integer(to_millis(&from)));
                    clauses.push(format!("date >= ?{}", values.len()));
                }
                if let Some(to) = query.date_to {
                    values.push(Value::Integer(to_millis(&to)));
                    clauses.push(format!("date <= ?{}", values.len()));
                }

                let text_filters = [
                    ("patient_name", &query.patient_name),
                    ("doctor_name", &query.doctor_name),
                    ("uhid_id", &query.uhid_id),
                ];
                for (column, needle) in text_filters {
                    if let Some(needle) = needle {
                        values.push(Value::Text(needle.to_lowercase()));
                        clauses.push(format!("instr({FOLD_CASE}({column}), ?{}) > 0", values.len()));
                    }
                }

                let where_sql = if clauses.is_empty() {
                    String::new()
                } else {
                    format!(" WHERE {}", clauses.join(" AND "))
                };

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM consultations{where_sql}"),
                    params_from_iter(values.iter()),
                    |row| row.get(0),
                )?;

                let mut page_values = values.clone();
                page_values.push(Value::Integer(i64::from(query.limit)));
                let limit_idx = page_values.len();
                page_values.push(Value::Integer(query.offset() as i64));
                let offset_idx = page_values.len();

                let sql = format!(
                    "SELECT {COLUMNS} FROM consultations{where_sql} \
                     ORDER BY {} {}, id ASC LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
                    query.sort_by.column(),
                    query.sort_order.keyword(),
                );

                let mut stmt = conn.prepare(&sql)?;
                let data = stmt
                    .query_map(params_from_iter(page_values.iter()), read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok(Page::new(data, total as u64, query.page, query.limit))
            })
            .await
    }

    /// The caller's own consultations, newest first
    pub async fn list_for_doctor(&self, principal: &Principal) -> Result<Vec<Consultation>> {
        let doctor = principal.id.clone();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM consultations WHERE doctor = ?1 ORDER BY date DESC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![doctor.as_str()], read_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
    }

    /// Update a record; owner or admin only
    pub async fn update(
        &self,
        principal: &Principal,
        id: Uuid,
        patch: ConsultationPatch,
    ) -> Result<Consultation> {
        let actor = principal.clone();

        let updated = self
            .db
            .call(move |conn| {
                let mut consultation = fetch_by_id(conn, id)?
                    .ok_or_else(|| Error::not_found(format!("Consultation {id} not found")))?;

                if !actor.may_modify(&consultation.doctor) {
                    warn!("{} denied update of consultation {}", actor.id, id);
                    return Err(Error::forbidden("Only the owning doctor or an admin may update"));
                }

                consultation.apply(patch)?;
                consultation.updated_at = truncate_millis(Utc::now());
                consultation.date = truncate_millis(consultation.date);

                conn.execute(
                    "UPDATE consultations SET uhid_id = ?2, patient_name = ?3, doctor_name = ?4,
                         attender_name = ?5, icu_consultant_name = ?6, video_file_name = ?7,
                         date = ?8, recording_duration = ?9, status = ?10, notes = ?11,
                         updated_at = ?12
                     WHERE id = ?1",
                    params![
                        consultation.id.to_string(),
                        consultation.uhid_id,
                        consultation.patient_name,
                        consultation.doctor_name,
                        consultation.attender_name,
                        consultation.icu_consultant_name,
                        consultation.video_file_name,
                        to_millis(&consultation.date),
                        consultation.recording_duration as i64,
                        consultation.status.as_str(),
                        consultation.notes,
                        to_millis(&consultation.updated_at),
                    ],
                )
                .map_err(|e| classify(e, &consultation.uhid_id))?;

                Ok(consultation)
            })
            .await?;

        info!("Consultation {} updated by {}", updated.id, principal.id);
        Ok(updated)
    }

    /// Remove the metadata record; owner or admin only. The artifact stays on
    /// disk and is reported by the orphan sweep.
    pub async fn delete(&self, principal: &Principal, id: Uuid) -> Result<Consultation> {
        let actor = principal.clone();

        let removed = self
            .db
            .call(move |conn| {
                let consultation = fetch_by_id(conn, id)?
                    .ok_or_else(|| Error::not_found(format!("Consultation {id} not found")))?;

                if !actor.may_modify(&consultation.doctor) {
                    warn!("{} denied delete of consultation {}", actor.id, id);
                    return Err(Error::forbidden("Only the owning doctor or an admin may delete"));
                }

                conn.execute(
                    "DELETE FROM consultations WHERE id = ?1",
                    params![id.to_string()],
                )?;
                Ok(consultation)
            })
            .await?;

        info!(
            "Consultation {} deleted by {} (artifact {} left in place)",
            removed.id, principal.id, removed.video_file_name
        );
        Ok(removed)
    }

    /// Every artifact name referenced by some record
    pub async fn referenced_file_names(&self) -> Result<HashSet<String>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT DISTINCT video_file_name FROM consultations")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<HashSet<_>>>()?;
                Ok(names)
            })
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.db
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM consultations", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
    }
}

fn insert(conn: &Connection, c: &Consultation) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO consultations ({COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            c.id.to_string(),
            c.uhid_id,
            c.patient_name,
            c.doctor.as_str(),
            c.doctor_name,
            c.attender_name,
            c.icu_consultant_name,
            c.video_file_name,
            to_millis(&c.date),
            c.recording_duration as i64,
            c.status.as_str(),
            c.notes,
            to_millis(&c.created_at),
            to_millis(&c.updated_at),
        ],
    )
}

fn fetch_by_id(conn: &Connection, id: Uuid) -> Result<Option<Consultation>> {
    let found = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM consultations WHERE id = ?1"),
            params![id.to_string()],
            read_row,
        )
        .optional()?;
    Ok(found)
}

/// Unique-index violations become `Conflict`; everything else is a server error
fn classify(error: rusqlite::Error, uhid_id: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &error {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        {
            return Error::Conflict(format!("UHID {uhid_id} already exists"));
        }
    }
    Error::from(error)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Consultation> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    let status: String = row.get(10)?;
    let status = status
        .parse::<ConsultationStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    let duration: i64 = row.get(9)?;

    Ok(Consultation {
        id,
        uhid_id: row.get(1)?,
        patient_name: row.get(2)?,
        doctor: PrincipalId::new(row.get::<_, String>(3)?),
        doctor_name: row.get(4)?,
        attender_name: row.get(5)?,
        icu_consultant_name: row.get(6)?,
        video_file_name: row.get(7)?,
        date: from_millis(row.get(8)?),
        recording_duration: duration.max(0) as u64,
        status,
        notes: row.get(11)?,
        created_at: from_millis(row.get(12)?),
        updated_at: from_millis(row.get(13)?),
    })
}
