use super::assembler::{AssembleError, FragmentBuffer, MediaAssembler};
use super::device::{CaptureConfig, CaptureDevice, DeviceError, MediaFragment};
use super::form::ConsultationForm;
use super::state::{SessionState, SessionStats};
use crate::client::IngestionClient;
use crate::consultation::{Consultation, NewConsultation};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Why a session ended in `Failed`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    #[error("Camera or microphone permission denied: {0}")]
    DevicePermissionDenied(String),

    #[error("Capture device error: {0}")]
    Device(String),

    #[error("No data captured")]
    NoDataCaptured,

    #[error("Upload failed: {0}")]
    Upload(String),

    /// The artifact is stored; only the metadata record is missing
    #[error("Video {video_file_name} was saved but its record was not: {reason}")]
    PartialIngestion {
        video_file_name: String,
        reason: String,
    },

    #[error("Capture task failed: {0}")]
    Internal(String),
}

impl From<DeviceError> for CaptureFailure {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::PermissionDenied(reason) => Self::DevicePermissionDenied(reason),
            DeviceError::Unavailable(reason) => Self::Device(reason),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Please fill in all required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("A capture session is already in progress ({0:?})")]
    Busy(SessionState),

    #[error("Cannot move capture session from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error(transparent)]
    Failed(#[from] CaptureFailure),
}

/// Drives one capture session at a time from form entry to a stored
/// consultation
///
/// Fragments are collected on a background task while recording. `stop`
/// waits for that task to drain the device stream, so the final flushed
/// fragment is always part of the assembled artifact.
pub struct CaptureController<D, C> {
    device: D,
    client: C,
    config: CaptureConfig,
    state: SessionState,

    /// Form snapshot bound when the session started
    form: Option<ConsultationForm>,

    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    /// Set on stop; freezes the elapsed timer
    stopped_at: Option<Instant>,

    fragments_count: Arc<AtomicUsize>,
    collector: Option<JoinHandle<FragmentBuffer>>,

    failure: Option<CaptureFailure>,
    /// Record awaiting a Phase B retry after a partial ingestion
    pending_metadata: Option<NewConsultation>,
    consultation: Option<Consultation>,
}

impl<D: CaptureDevice, C: IngestionClient> CaptureController<D, C> {
    pub fn new(device: D, client: C) -> Self {
        Self::with_config(device, client, CaptureConfig::default())
    }

    pub fn with_config(device: D, client: C, config: CaptureConfig) -> Self {
        Self {
            device,
            client,
            config,
            state: SessionState::Idle,
            form: None,
            started_at: None,
            started_wall: None,
            stopped_at: None,
            fragments_count: Arc::new(AtomicUsize::new(0)),
            collector: None,
            failure: None,
            pending_metadata: None,
            consultation: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn failure(&self) -> Option<&CaptureFailure> {
        self.failure.as_ref()
    }

    pub fn form(&self) -> Option<&ConsultationForm> {
        self.form.as_ref()
    }

    pub fn pending_metadata(&self) -> Option<&NewConsultation> {
        self.pending_metadata.as_ref()
    }

    pub fn consultation(&self) -> Option<&Consultation> {
        self.consultation.as_ref()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments_count.load(Ordering::SeqCst)
    }

    /// Whole seconds since capture started, frozen once stop was requested
    pub fn elapsed_seconds(&self) -> u64 {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => stop.duration_since(start).as_secs(),
            (Some(start), None) => start.elapsed().as_secs(),
            _ => 0,
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            started_at: self.started_wall,
            elapsed_secs: self.elapsed_seconds(),
            fragments_count: self.fragment_count(),
        }
    }

    /// Validate and bind the form; moves to `AcquiringDevices`
    pub fn prepare(&mut self, form: &ConsultationForm) -> Result<(), CaptureError> {
        if self.state != SessionState::Idle {
            warn!("Capture start ignored, session is {:?}", self.state);
            return Err(CaptureError::Busy(self.state));
        }

        let missing = form.missing_fields();
        if !missing.is_empty() {
            return Err(CaptureError::MissingFields(missing));
        }

        self.form = Some(form.trimmed());
        self.transition(SessionState::AcquiringDevices)
    }

    /// Ask for the devices and begin collecting fragments
    pub async fn acquire(&mut self) -> Result<(), CaptureError> {
        self.expect_state(SessionState::AcquiringDevices, SessionState::Recording)?;

        let receiver = match self.device.acquire(&self.config).await {
            Ok(receiver) => receiver,
            Err(e) => {
                warn!("Device acquisition failed on {}: {}", self.device.name(), e);
                self.device.release().await;
                return self.fail(e.into());
            }
        };

        self.started_at = Some(Instant::now());
        self.started_wall = Some(Utc::now());
        self.fragments_count.store(0, Ordering::SeqCst);
        self.collector = Some(spawn_collector(receiver, Arc::clone(&self.fragments_count)));

        self.transition(SessionState::Recording)?;
        info!(
            "Recording consultation for UHID {} on {}",
            self.form.as_ref().map(|f| f.uhid_id.as_str()).unwrap_or_default(),
            self.device.name()
        );
        Ok(())
    }

    /// `prepare` then `acquire`
    pub async fn start(&mut self, form: &ConsultationForm) -> Result<(), CaptureError> {
        self.prepare(form)?;
        self.acquire().await
    }

    /// Stop capture and hand the recording to the ingestion transport
    pub async fn stop(&mut self) -> Result<Consultation, CaptureError> {
        self.expect_state(SessionState::Recording, SessionState::Stopping)?;

        self.stopped_at = Some(Instant::now());
        self.transition(SessionState::Stopping)?;

        if let Err(e) = self.device.stop().await {
            error!("Failed to stop capture device: {}", e);
            self.abort_collector();
            self.device.release().await;
            return self.fail(e.into());
        }

        // The collector ends when the device closes its stream after the final flush
        let buffer = match self.collector.take() {
            Some(mut handle) => match tokio::time::timeout(self.config.flush_timeout, &mut handle).await {
                Ok(Ok(buffer)) => buffer,
                Ok(Err(e)) => {
                    self.device.release().await;
                    return self.fail(CaptureFailure::Internal(e.to_string()));
                }
                Err(_) => {
                    handle.abort();
                    self.device.release().await;
                    return self.fail(CaptureFailure::Device(format!(
                        "{} did not finish flushing within {:?}",
                        self.device.name(),
                        self.config.flush_timeout
                    )));
                }
            },
            None => FragmentBuffer::new(),
        };
        self.device.release().await;

        self.transition(SessionState::Assembling)?;

        let Some(form) = self.form.clone() else {
            return self.fail(CaptureFailure::Internal("no form bound to session".to_string()));
        };
        let started_wall = self.started_wall.unwrap_or_else(Utc::now);

        let artifact = match MediaAssembler::assemble(buffer, &form.uhid_id, started_wall, &self.config.mime_type) {
            Ok(artifact) => artifact,
            Err(AssembleError::NoData) => return self.fail(CaptureFailure::NoDataCaptured),
        };

        self.transition(SessionState::Uploading)?;

        let stored = match self.client.upload(&artifact).await {
            Ok(stored) => stored,
            Err(e) => return self.fail(CaptureFailure::Upload(e.to_string())),
        };
        drop(artifact);

        self.transition(SessionState::PersistingMetadata)?;

        let record = form.to_record(&stored.file_name, self.elapsed_seconds());
        match self.client.create(&record).await {
            Ok(consultation) => self.complete(consultation),
            Err(e) => {
                self.pending_metadata = Some(record);
                self.fail(CaptureFailure::PartialIngestion {
                    video_file_name: stored.file_name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Resubmit metadata after a partial ingestion without re-uploading
    pub async fn retry_metadata(&mut self) -> Result<Consultation, CaptureError> {
        let Some(record) = self.pending_metadata.clone() else {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: SessionState::Complete,
            });
        };

        info!("Retrying metadata for {}", record.video_file_name);
        match self.client.retry_create(&record).await {
            Ok(consultation) => {
                // The only way out of Failed other than dismiss
                info!("Capture session {:?} -> {:?}", self.state, SessionState::Complete);
                self.state = SessionState::Complete;
                self.pending_metadata = None;
                self.failure = None;
                self.consultation = Some(consultation.clone());
                Ok(consultation)
            }
            Err(e) => {
                let failure = CaptureFailure::PartialIngestion {
                    video_file_name: record.video_file_name,
                    reason: e.to_string(),
                };
                self.failure = Some(failure.clone());
                Err(CaptureError::Failed(failure))
            }
        }
    }

    /// Abandon capture before stop; nothing is uploaded
    pub async fn cancel(&mut self) -> Result<(), CaptureError> {
        if !matches!(self.state, SessionState::AcquiringDevices | SessionState::Recording) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: SessionState::Idle,
            });
        }

        self.abort_collector();
        self.device.release().await;
        self.reset();
        self.transition(SessionState::Idle)?;
        info!("Capture session cancelled");
        Ok(())
    }

    /// Clear a finished session so a new one can start
    pub fn dismiss(&mut self) -> Result<(), CaptureError> {
        if !self.state.is_terminal() {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: SessionState::Idle,
            });
        }
        self.reset();
        self.transition(SessionState::Idle)
    }

    fn complete(&mut self, consultation: Consultation) -> Result<Consultation, CaptureError> {
        self.transition(SessionState::Complete)?;
        info!(
            "Consultation {} saved ({}s, {} fragments)",
            consultation.id,
            consultation.recording_duration,
            self.fragment_count()
        );
        self.consultation = Some(consultation.clone());
        Ok(consultation)
    }

    fn transition(&mut self, next: SessionState) -> Result<(), CaptureError> {
        if !self.state.can_transition_to(next) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!("Capture session {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn expect_state(&self, expected: SessionState, next: SessionState) -> Result<(), CaptureError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(CaptureError::InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }

    fn fail<T>(&mut self, failure: CaptureFailure) -> Result<T, CaptureError> {
        error!("Capture session failed in {:?}: {}", self.state, failure);
        if self.state.can_transition_to(SessionState::Failed) {
            self.state = SessionState::Failed;
        }
        self.failure = Some(failure.clone());
        Err(CaptureError::Failed(failure))
    }

    fn abort_collector(&mut self) {
        if let Some(handle) = self.collector.take() {
            handle.abort();
        }
    }

    fn reset(&mut self) {
        self.form = None;
        self.started_at = None;
        self.started_wall = None;
        self.stopped_at = None;
        self.fragments_count.store(0, Ordering::SeqCst);
        self.failure = None;
        self.pending_metadata = None;
        self.consultation = None;
    }
}

fn spawn_collector(
    mut receiver: mpsc::Receiver<MediaFragment>,
    count: Arc<AtomicUsize>,
) -> JoinHandle<FragmentBuffer> {
    tokio::spawn(async move {
        let mut buffer = FragmentBuffer::new();
        while let Some(fragment) = receiver.recv().await {
            if buffer.push(fragment) {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }
        info!(
            "Fragment stream closed ({} fragments, {} bytes)",
            buffer.len(),
            buffer.total_bytes()
        );
        buffer
    })
}
