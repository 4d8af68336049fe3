// Integration tests for two-phase ingestion
//
// Phase A writes the artifact under the current storage root, Phase B
// records the metadata. These tests cover the ordering guarantee, partial
// ingestion, the idempotent retry and the orphan sweep.

use anyhow::Result;
use consultation_capture::{
    locate_artifact, ArtifactUpload, AuthError, ConsultationStore, Database, Error,
    IngestionService, IngestionTimeouts, NewConsultation, Principal, StorageDefaults,
    StorageResolver, StorageUpdate,
};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _temp: TempDir,
    root: std::path::PathBuf,
    service: IngestionService,
}

fn fixture() -> Result<Fixture> {
    let temp = TempDir::new()?;
    let root = temp.path().join("recordings");
    let db = Database::memory()?;

    let defaults = StorageDefaults {
        default_path: root.to_string_lossy().to_string(),
        ..StorageDefaults::default()
    };
    let resolver = StorageResolver::new(db.clone(), defaults);
    let store = ConsultationStore::new(db);
    let service = IngestionService::new(resolver, store, IngestionTimeouts::default());

    Ok(Fixture {
        _temp: temp,
        root,
        service,
    })
}

fn upload(name: &str, data: &[u8]) -> ArtifactUpload {
    ArtifactUpload {
        file_name: Some(name.to_string()),
        content_type: "video/webm;codecs=vp9,opus".to_string(),
        data: data.to_vec(),
    }
}

fn form(uhid: &str) -> NewConsultation {
    NewConsultation {
        patient_name: "A".to_string(),
        uhid_id: uhid.to_string(),
        doctor_name: "Dr. B".to_string(),
        attender_name: "C".to_string(),
        icu_consultant_name: "D".to_string(),
        recording_duration: 42,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_ingest_writes_artifact_then_record() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let consultation = fx
        .service
        .ingest(&doctor, upload("consultation_1700000000000_U1.webm", b"fragment-bytes"), form("U1"))
        .await?;

    assert_eq!(consultation.video_file_name, "consultation_1700000000000_U1.webm");
    assert_eq!(consultation.doctor, doctor.id);

    let written = fs::read(fx.root.join(&consultation.video_file_name))?;
    assert_eq!(written, b"fragment-bytes");

    Ok(())
}

#[tokio::test]
async fn test_metadata_requires_stored_artifact() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let mut record = form("U1");
    record.video_file_name = "never-uploaded.webm".to_string();

    let err = fx.service.record_metadata(&doctor, record).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(fx.service.store().count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_invalid_form_stores_nothing() -> Result<()> {
    let fx = fixture()?;
    let mut record = form("U1");
    record.attender_name = String::new();

    let err = fx
        .service
        .ingest(&Principal::doctor("d1"), upload("a.webm", b"data"), record)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(!fx.root.join("a.webm").exists());

    Ok(())
}

#[tokio::test]
async fn test_duplicate_uhid_after_upload_is_partial_ingestion() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");
    let admin = Principal::admin("root");

    fx.service.ingest(&doctor, upload("first.webm", b"one"), form("U1")).await?;

    let err = fx
        .service
        .ingest(&doctor, upload("second.webm", b"two"), form("U1"))
        .await
        .unwrap_err();

    match err {
        Error::PartialIngestion { file_name, source } => {
            assert_eq!(file_name, "second.webm");
            assert!(matches!(*source, Error::Conflict(_)));
        }
        other => panic!("expected partial ingestion, got {other:?}"),
    }
    assert!(fx.root.join("second.webm").is_file());

    let orphans = fx.service.orphaned_artifacts(&admin).await?;
    assert_eq!(orphans, vec!["second.webm".to_string()]);
    assert_eq!(fx.service.store().count().await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_metadata_retry_is_idempotent() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let stored = fx.service.store_artifact(&doctor, upload("v1.webm", b"data")).await?;
    let mut record = form("U1");
    record.video_file_name = stored.file_name.clone();

    let first = fx.service.record_metadata(&doctor, record.clone()).await?;

    // The response to the first attempt was lost; the retry returns the same record
    let retried = fx.service.retry_metadata(&doctor, record.clone()).await?;
    assert_eq!(retried.id, first.id);

    // A plain create is still a conflict
    let err = fx.service.record_metadata(&doctor, record.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // So is a retry by someone else
    let err = fx
        .service
        .retry_metadata(&Principal::doctor("d2"), record)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert_eq!(fx.service.store().count().await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_artifact_write_timeout_leaves_no_file() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path().join("recordings");
    let db = Database::memory()?;
    let defaults = StorageDefaults {
        default_path: root.to_string_lossy().to_string(),
        ..StorageDefaults::default()
    };
    let timeouts = IngestionTimeouts {
        artifact_write: Duration::ZERO,
        ..IngestionTimeouts::default()
    };
    let service = IngestionService::new(
        StorageResolver::new(db.clone(), defaults),
        ConsultationStore::new(db),
        timeouts,
    );
    let doctor = Principal::doctor("d1");

    // Large enough to need many chunked writes
    let data = vec![7u8; 64 * 1024 * 1024];
    let err = service
        .ingest(&doctor, upload("slow.webm", &data), form("U1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(_)), "got {err:?}");
    assert_eq!(fs::read_dir(&root)?.count(), 0);
    assert_eq!(service.store().count().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_metadata_write_timeout_is_partial_then_retryable() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path().join("recordings");
    let settings_db = Database::memory()?;
    let records_db = Database::memory()?;
    let defaults = StorageDefaults {
        default_path: root.to_string_lossy().to_string(),
        ..StorageDefaults::default()
    };
    let resolver = StorageResolver::new(settings_db, defaults);
    let store = ConsultationStore::new(records_db.clone());
    let timeouts = IngestionTimeouts {
        metadata_write: Duration::from_millis(50),
        ..IngestionTimeouts::default()
    };
    let service = IngestionService::new(resolver.clone(), store.clone(), timeouts);
    let doctor = Principal::doctor("d1");

    // Keep the record database busy well past the metadata deadline
    let (held_tx, held_rx) = tokio::sync::oneshot::channel();
    let holder = tokio::spawn(async move {
        records_db
            .call(move |_conn| {
                let _ = held_tx.send(());
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .await
    });
    held_rx.await?;

    let err = service
        .ingest(&doctor, upload("v1.webm", b"data"), form("U1"))
        .await
        .unwrap_err();
    let (file_name, source) = match err {
        Error::PartialIngestion { file_name, source } => (file_name, source),
        other => panic!("expected partial ingestion, got {other:?}"),
    };
    assert_eq!(file_name, "v1.webm");
    assert!(matches!(*source, Error::Server(_)), "got {source:?}");
    assert_eq!(fs::read(root.join(&file_name))?, b"data");

    holder.await??;

    // The timed-out insert may land late; the retry settles on one record either way
    let retrying = IngestionService::new(resolver, store, IngestionTimeouts::default());
    let mut record = form("U1");
    record.video_file_name = file_name.clone();
    let consultation = retrying.retry_metadata(&doctor, record).await?;

    assert_eq!(consultation.video_file_name, file_name);
    assert_eq!(retrying.store().count().await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_rejects_bad_uploads() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let mut not_media = upload("notes.webm", b"data");
    not_media.content_type = "text/plain".to_string();
    assert!(matches!(
        fx.service.store_artifact(&doctor, not_media).await,
        Err(Error::Validation(_))
    ));

    assert!(matches!(
        fx.service.store_artifact(&doctor, upload("empty.webm", b"")).await,
        Err(Error::Validation(_))
    ));

    let mut mkv = upload("clip.mkv", b"data");
    mkv.content_type = "video/x-matroska".to_string();
    assert!(matches!(
        fx.service.store_artifact(&doctor, mkv).await,
        Err(Error::Validation(_))
    ));

    let admin = Principal::admin("root");
    let small = StorageUpdate {
        max_size_mb: Some(1),
        ..StorageUpdate::path(fx.root.to_string_lossy())
    };
    fx.service.resolver().update(&admin, small).await?;
    let too_big = vec![0u8; 1024 * 1024 + 1];
    assert!(matches!(
        fx.service.store_artifact(&doctor, upload("big.webm", &too_big)).await,
        Err(Error::Validation(_))
    ));

    assert_eq!(fs::read_dir(&fx.root)?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_name_collision_gets_unique_name() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let first = fx.service.store_artifact(&doctor, upload("same.webm", b"one")).await?;
    let second = fx.service.store_artifact(&doctor, upload("same.webm", b"two")).await?;

    assert_eq!(first.file_name, "same.webm");
    assert_ne!(second.file_name, first.file_name);
    assert!(second.file_name.ends_with(".webm"));
    assert_eq!(fs::read(fx.root.join(&first.file_name))?, b"one");
    assert_eq!(fs::read(fx.root.join(&second.file_name))?, b"two");

    Ok(())
}

#[tokio::test]
async fn test_suggested_name_cannot_escape_root() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let stored = fx
        .service
        .store_artifact(&doctor, upload("../../outside.webm", b"data"))
        .await?;

    assert_eq!(stored.file_name, "outside.webm");
    assert!(fx.root.join("outside.webm").is_file());

    let generated = fx
        .service
        .store_artifact(
            &doctor,
            ArtifactUpload {
                file_name: None,
                content_type: "video/mp4".to_string(),
                data: b"data".to_vec(),
            },
        )
        .await?;
    assert!(generated.file_name.starts_with("consultation_"));
    assert!(generated.file_name.ends_with(".mp4"));

    Ok(())
}

#[tokio::test]
async fn test_writes_follow_the_current_root() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");
    let admin = Principal::admin("root");

    let old = fx.service.store_artifact(&doctor, upload("old.webm", b"old")).await?;

    let moved = fx.root.parent().unwrap().join("moved");
    fx.service
        .resolver()
        .update(&admin, StorageUpdate::path(moved.to_string_lossy()))
        .await?;

    let new = fx.service.store_artifact(&doctor, upload("new.webm", b"new")).await?;
    assert!(moved.join(&new.file_name).is_file());

    let located = locate_artifact(fx.service.resolver(), &new.file_name).await?;
    assert_eq!(located, moved.join("new.webm"));

    // Artifacts are not migrated with the root
    let err = locate_artifact(fx.service.resolver(), &old.file_name).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_orphan_sweep_is_admin_only() -> Result<()> {
    let fx = fixture()?;
    let doctor = Principal::doctor("d1");

    let consultation = fx.service.ingest(&doctor, upload("kept.webm", b"data"), form("U1")).await?;
    fx.service.store().delete(&doctor, consultation.id).await?;

    let err = fx.service.orphaned_artifacts(&doctor).await.unwrap_err();
    assert!(matches!(err, Error::Auth(AuthError::Forbidden(_))));

    let orphans = fx.service.orphaned_artifacts(&Principal::admin("root")).await?;
    assert_eq!(orphans, vec!["kept.webm".to_string()]);

    Ok(())
}
