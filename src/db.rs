//! Embedded SQLite database shared by the metadata store and the storage
//! configuration.
//!
//! All access goes through [`Database::call`], which runs the closure on the
//! blocking pool while holding the connection lock.

use crate::error::Result;
use anyhow::Context;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS consultations (
    id                  TEXT PRIMARY KEY,
    uhid_id             TEXT NOT NULL,
    patient_name        TEXT NOT NULL,
    doctor              TEXT NOT NULL,
    doctor_name         TEXT NOT NULL,
    attender_name       TEXT NOT NULL,
    icu_consultant_name TEXT NOT NULL,
    video_file_name     TEXT NOT NULL,
    date                INTEGER NOT NULL,
    recording_duration  INTEGER NOT NULL CHECK (recording_duration >= 0),
    status              TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'cancelled')),
    notes               TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_consultations_uhid ON consultations (uhid_id);
CREATE INDEX IF NOT EXISTS idx_consultations_doctor ON consultations (doctor);
CREATE INDEX IF NOT EXISTS idx_consultations_date ON consultations (date DESC);

CREATE TABLE IF NOT EXISTS storage_settings (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    path          TEXT NOT NULL,
    max_size_mb   INTEGER NOT NULL,
    allowed_types TEXT NOT NULL,
    last_updated  INTEGER NOT NULL
);
";

/// Unicode lower-casing SQL function used by the text filters
pub(crate) const FOLD_CASE: &str = "fold_case";

/// Shared handle to the SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        info!("Opened metadata database: {}", path.display());

        Self::with_connection(conn)
    }

    /// In-memory database, lost when the handle is dropped
    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to apply database schema")?;

        // SQLite's lower() only folds ASCII
        conn.create_scalar_function(
            FOLD_CASE,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| v.to_lowercase()))
            },
        )
        .context("Failed to register case folding function")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

pub(crate) fn to_millis(at: &chrono::DateTime<chrono::Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Drop sub-millisecond precision so values read back compare equal
pub(crate) fn truncate_millis(at: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
    from_millis(to_millis(&at))
}
