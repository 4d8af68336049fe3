// Integration tests for the capture session controller
//
// A ChannelDevice is fed by a producer task standing in for the platform
// recorder, and a fake transport records what would have been sent.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use consultation_capture::capture::{CaptureError, CaptureFailure, DeviceError};
use consultation_capture::consultation::ConsultationStatus;
use consultation_capture::ingest::StoredArtifact;
use consultation_capture::{
    Artifact, CaptureConfig, CaptureController, CaptureDevice, ChannelDevice, Consultation,
    ConsultationForm, Error, FragmentSink, FragmentSinks, IngestionClient, MediaFragment, NewConsultation,
    PrincipalId, SessionState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Sent {
    uploads: Vec<Artifact>,
    records: Vec<NewConsultation>,
    retries: usize,
    fail_upload: bool,
    fail_create: bool,
}

#[derive(Clone, Default)]
struct FakeTransport {
    sent: Arc<Mutex<Sent>>,
}

impl FakeTransport {
    fn failing_upload() -> Self {
        let transport = Self::default();
        transport.sent.lock().unwrap().fail_upload = true;
        transport
    }

    fn failing_create() -> Self {
        let transport = Self::default();
        transport.sent.lock().unwrap().fail_create = true;
        transport
    }
}

fn saved(record: &NewConsultation) -> Consultation {
    let now = Utc::now();
    Consultation {
        id: uuid::Uuid::new_v4(),
        uhid_id: record.uhid_id.clone(),
        patient_name: record.patient_name.clone(),
        doctor: PrincipalId::new("d1"),
        doctor_name: record.doctor_name.clone(),
        attender_name: record.attender_name.clone(),
        icu_consultant_name: record.icu_consultant_name.clone(),
        video_file_name: record.video_file_name.clone(),
        date: now,
        recording_duration: record.recording_duration as u64,
        status: ConsultationStatus::Completed,
        notes: record.notes.clone(),
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl IngestionClient for FakeTransport {
    async fn upload(&self, artifact: &Artifact) -> consultation_capture::Result<StoredArtifact> {
        let mut sent = self.sent.lock().unwrap();
        if sent.fail_upload {
            return Err(Error::Storage("disk full".to_string()));
        }
        sent.uploads.push(artifact.clone());
        Ok(StoredArtifact {
            file_name: artifact.file_name.clone(),
            size: artifact.data.len() as u64,
            content_type: artifact.content_type.clone(),
        })
    }

    async fn create(&self, record: &NewConsultation) -> consultation_capture::Result<Consultation> {
        let mut sent = self.sent.lock().unwrap();
        if sent.fail_create {
            return Err(Error::Server(anyhow::anyhow!("metadata write timed out")));
        }
        sent.records.push(record.clone());
        Ok(saved(record))
    }

    async fn retry_create(&self, record: &NewConsultation) -> consultation_capture::Result<Consultation> {
        let mut sent = self.sent.lock().unwrap();
        sent.retries += 1;
        sent.records.push(record.clone());
        Ok(saved(record))
    }
}

/// Device that never gets permission
struct DeniedDevice;

#[async_trait]
impl CaptureDevice for DeniedDevice {
    async fn acquire(&mut self, _config: &CaptureConfig) -> Result<mpsc::Receiver<MediaFragment>, DeviceError> {
        Err(DeviceError::PermissionDenied("camera blocked".to_string()))
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn release(&mut self) {}

    fn name(&self) -> &str {
        "denied"
    }
}

fn form() -> ConsultationForm {
    ConsultationForm {
        patient_name: "A".to_string(),
        uhid_id: "U100".to_string(),
        attender_name: "C".to_string(),
        icu_consultant_name: "D".to_string(),
        doctor_name: "Dr. B".to_string(),
        notes: None,
    }
}

async fn next_sink(sinks: &mut FragmentSinks) -> FragmentSink {
    sinks.next().await.expect("device acquired")
}

/// Emit `fragments`, then `last` once the final flush is requested
fn spawn_recorder(
    mut sink: FragmentSink,
    fragments: Vec<&'static str>,
    last: Option<&'static str>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        for (i, data) in fragments.into_iter().enumerate() {
            sink.push(MediaFragment::new(data.as_bytes(), i as u64 * 1000)).await;
        }
        sink.stop_requested().await;
        if let Some(data) = last {
            sink.push(MediaFragment::new(data.as_bytes(), 60_000)).await;
        }
        sink.finish();
    })
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_includes_final_fragment() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::default();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    assert_eq!(controller.state(), SessionState::Recording);

    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["aa", "", "bb"], Some("cc"));
    tokio::time::advance(Duration::from_secs(42)).await;

    let consultation = controller.stop().await?;
    recorder.await?;

    assert_eq!(controller.state(), SessionState::Complete);
    assert_eq!(controller.fragment_count(), 3);
    assert_eq!(consultation.recording_duration, 42);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.uploads.len(), 1);
    assert_eq!(sent.uploads[0].data, b"aabbcc");
    assert_eq!(sent.uploads[0].content_type, "video/webm");
    assert!(sent.uploads[0].file_name.starts_with("consultation_"));
    assert!(sent.uploads[0].file_name.ends_with("_U100.webm"));

    assert_eq!(sent.records.len(), 1);
    assert_eq!(sent.records[0].video_file_name, sent.uploads[0].file_name);
    assert_eq!(sent.records[0].recording_duration, 42);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_timer_freezes_on_stop() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let mut controller = CaptureController::new(device, FakeTransport::default());

    controller.start(&form()).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["data"], None);

    tokio::time::advance(Duration::from_secs(7)).await;
    assert_eq!(controller.elapsed_seconds(), 7);

    controller.stop().await?;
    recorder.await?;

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(controller.elapsed_seconds(), 7);
    assert_eq!(controller.stats().elapsed_secs, 7);

    Ok(())
}

#[tokio::test]
async fn test_missing_fields_keep_session_idle() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let mut controller = CaptureController::new(device, FakeTransport::default());

    let mut incomplete = form();
    incomplete.uhid_id = "   ".to_string();
    incomplete.doctor_name = String::new();

    let err = controller.start(&incomplete).await.unwrap_err();
    assert_eq!(err, CaptureError::MissingFields(vec!["uhidId", "doctorName"]));
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(sinks.try_next().is_none());

    Ok(())
}

#[tokio::test]
async fn test_second_start_while_recording_is_busy() -> Result<()> {
    let (device, _sinks) = ChannelDevice::new(16);
    let mut controller = CaptureController::new(device, FakeTransport::default());

    controller.start(&form()).await?;
    let err = controller.start(&form()).await.unwrap_err();

    assert_eq!(err, CaptureError::Busy(SessionState::Recording));
    assert_eq!(controller.state(), SessionState::Recording);

    Ok(())
}

#[tokio::test]
async fn test_permission_denied_fails_session() -> Result<()> {
    let mut controller = CaptureController::new(DeniedDevice, FakeTransport::default());

    let err = controller.start(&form()).await.unwrap_err();
    assert!(matches!(
        err,
        CaptureError::Failed(CaptureFailure::DevicePermissionDenied(_))
    ));
    assert_eq!(controller.state(), SessionState::Failed);
    assert!(controller.failure().is_some());

    controller.dismiss()?;
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.failure().is_none());

    Ok(())
}

#[tokio::test]
async fn test_no_fragments_never_reaches_upload() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::default();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec![""], None);

    let err = controller.stop().await.unwrap_err();
    recorder.await?;

    assert_eq!(err, CaptureError::Failed(CaptureFailure::NoDataCaptured));
    assert_eq!(controller.state(), SessionState::Failed);
    assert!(transport.sent.lock().unwrap().uploads.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_upload_failure_skips_metadata() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::failing_upload();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["data"], None);

    let err = controller.stop().await.unwrap_err();
    recorder.await?;

    assert!(matches!(err, CaptureError::Failed(CaptureFailure::Upload(_))));
    assert!(transport.sent.lock().unwrap().records.is_empty());
    assert!(controller.pending_metadata().is_none());

    Ok(())
}

#[tokio::test]
async fn test_metadata_failure_is_partial_and_retryable() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::failing_create();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["data"], None);

    let err = controller.stop().await.unwrap_err();
    recorder.await?;

    let uploaded = transport.sent.lock().unwrap().uploads[0].file_name.clone();
    match err {
        CaptureError::Failed(CaptureFailure::PartialIngestion { video_file_name, .. }) => {
            assert_eq!(video_file_name, uploaded);
        }
        other => panic!("expected partial ingestion, got {other:?}"),
    }
    assert_eq!(controller.state(), SessionState::Failed);

    let pending = controller.pending_metadata().cloned().unwrap();
    assert_eq!(pending.video_file_name, uploaded);

    let consultation = controller.retry_metadata().await?;
    assert_eq!(consultation.video_file_name, uploaded);
    assert!(controller.pending_metadata().is_none());
    assert_eq!(controller.state(), SessionState::Complete);
    assert!(controller.failure().is_none());
    assert_eq!(controller.consultation().map(|c| c.id), Some(consultation.id));

    controller.dismiss()?;
    assert_eq!(controller.state(), SessionState::Idle);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.retries, 1);
    assert_eq!(sent.uploads.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancel_releases_devices_without_upload() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::default();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    let sink = next_sink(&mut sinks).await;
    sink.push(MediaFragment::new(b"data".to_vec(), 0)).await;

    controller.cancel().await?;

    assert_eq!(controller.state(), SessionState::Idle);
    assert!(sink.is_released());
    assert!(transport.sent.lock().unwrap().uploads.is_empty());
    assert_eq!(controller.fragment_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_out_of_order_commands_are_rejected() -> Result<()> {
    let (device, _sinks) = ChannelDevice::new(16);
    let mut controller = CaptureController::new(device, FakeTransport::default());

    let err = controller.stop().await.unwrap_err();
    assert_eq!(
        err,
        CaptureError::InvalidTransition {
            from: SessionState::Idle,
            to: SessionState::Stopping
        }
    );
    assert!(controller.cancel().await.is_err());
    assert!(controller.dismiss().is_err());
    assert!(controller.retry_metadata().await.is_err());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_device_serves_consecutive_sessions() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::default();
    let mut controller = CaptureController::new(device, transport.clone());

    controller.start(&form()).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["first"], None);
    tokio::time::advance(Duration::from_secs(5)).await;
    let first = controller.stop().await?;
    recorder.await?;
    controller.dismiss()?;

    let mut second_form = form();
    second_form.uhid_id = "U200".to_string();
    controller.start(&second_form).await?;
    let recorder = spawn_recorder(next_sink(&mut sinks).await, vec!["second"], Some("!"));
    tokio::time::advance(Duration::from_secs(3)).await;
    let second = controller.stop().await?;
    recorder.await?;

    assert_eq!(controller.state(), SessionState::Complete);
    assert_eq!(first.recording_duration, 5);
    assert_eq!(second.recording_duration, 3);
    assert_eq!(second.uhid_id, "U200");

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.uploads.len(), 2);
    assert_eq!(sent.uploads[0].data, b"first");
    assert_eq!(sent.uploads[1].data, b"second!");
    assert!(sent.uploads[1].file_name.ends_with("_U200.webm"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_fails_when_device_never_flushes() -> Result<()> {
    let (device, mut sinks) = ChannelDevice::new(16);
    let transport = FakeTransport::default();
    let config = CaptureConfig {
        flush_timeout: Duration::from_secs(2),
        ..CaptureConfig::default()
    };
    let mut controller = CaptureController::with_config(device, transport.clone(), config);

    controller.start(&form()).await?;
    // Never finished, so the fragment stream stays open
    let sink = next_sink(&mut sinks).await;
    assert!(sink.push(MediaFragment::new(b"data".to_vec(), 0)).await);

    let err = controller.stop().await.unwrap_err();

    assert!(matches!(err, CaptureError::Failed(CaptureFailure::Device(_))));
    assert_eq!(controller.state(), SessionState::Failed);
    assert!(sink.is_released());
    assert!(transport.sent.lock().unwrap().uploads.is_empty());

    // The device is free again for the next session
    controller.dismiss()?;
    controller.start(&form()).await?;
    assert_eq!(controller.state(), SessionState::Recording);

    Ok(())
}
