use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::core::config::TransformConfig;
use crate::core::diff::DiffError;
use crate::core::hil::HilError;
use crate::core::history::STATUS_IN_PROGRESS;
use crate::core::orchestrator::{JobError, SubmitError, TransformationOrchestrator};
use crate::core::remote::{ExportContext, ResumeAction, UploadContext};
use crate::core::testing::{FakeRunner, write_maven_project, zip_bytes};
use crate::core::transform::JobStateError;

struct Fixture {
    _dir: tempfile::TempDir,
    project: PathBuf,
    data: PathBuf,
    api: Arc<FakeApi>,
    orchestrator: TransformationOrchestrator,
}

fn fixture(statuses: Vec<RemoteJobStatus>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("demo");
    write_maven_project(&project);
    let data = dir.path().join("data");
    let api = Arc::new(FakeApi::new(statuses));
    let orchestrator = TransformationOrchestrator::new(
        client(&api),
        Arc::new(FakeRunner::succeeding()),
        shared_job_state(),
        &TransformConfig::default(),
        &data,
        &dir.path().join("tmp"),
    )
    .with_poll_interval(TICK);
    Fixture {
        _dir: dir,
        project,
        data,
        api,
        orchestrator,
    }
}

async fn configure(fx: &Fixture) {
    fx.orchestrator
        .job()
        .lock()
        .await
        .begin(upgrade_setup(fx.project.clone()));
}

fn job_dir(data: &Path) -> PathBuf {
    data.join("demo").join("job-1")
}

#[tokio::test]
async fn submit_uploads_starts_and_records_the_job() {
    let fx = fixture(vec![]);
    configure(&fx).await;

    let job_id = fx
        .orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(job_id, "job-1");
    assert_eq!(fx.api.uploads(), vec![UploadContext::TransformationSource]);
    assert!(fx.orchestrator.job().lock().await.is_submitted());
    for name in ["zipped-code.zip", "metadata.json", "buildCommandOutput.log"] {
        assert!(job_dir(&fx.data).join(name).is_file(), "{name} missing");
    }
    let entry = fx.orchestrator.history().find("job-1").unwrap().unwrap();
    assert_eq!(entry.status, STATUS_IN_PROGRESS);
    assert_eq!(entry.source_jdk.as_deref(), Some("JDK8"));
}

#[tokio::test]
async fn submitting_twice_does_not_start_a_second_job() {
    let fx = fixture(vec![]);
    configure(&fx).await;
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();

    let err = fx
        .orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::State(JobStateError::AlreadySubmitted(_))
    ));
    assert_eq!(fx.api.start_calls(), 1);
}

#[tokio::test]
async fn completed_job_results_are_downloaded_and_recorded() {
    let fx = fixture(vec![RemoteJobStatus::Transforming, RemoteJobStatus::Completed]);
    configure(&fx).await;
    fx.api.set_export(
        &ExportContext::ResultArchive,
        zip_bytes(&[
            ("patch/diff.json", br#"{"content":[
                {"name":"Minimal","fileName":"minimal.patch","isSuccessful":true},
                {"name":"Popular","fileName":"popular.patch","isSuccessful":true}
            ]}"#),
            ("patch/minimal.patch", MODIFY_A.as_bytes()),
            ("patch/popular.patch", MODIFY_A.as_bytes()),
            ("summary/summary.md", b"# Upgraded\n"),
        ]),
    );
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();

    let status = fx
        .orchestrator
        .poll(&RecordingObserver::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, RemoteJobStatus::Completed);

    let artifacts = fx.orchestrator.download_results().await.unwrap();
    assert_eq!(artifacts.patches.len(), 2);
    assert!(fx.orchestrator.job().lock().await.multiple_diffs());
    let diff = artifacts.diff_patch.clone().unwrap();
    assert_eq!(diff, job_dir(&fx.data).join("diff.patch"));
    assert_eq!(std::fs::read_to_string(&diff).unwrap(), MODIFY_A);
    assert!(!job_dir(&fx.data).join("ExportResultArchive.zip").exists());

    fx.orchestrator.record_outcome(Some(&artifacts)).await;
    let entry = fx.orchestrator.history().find("job-1").unwrap().unwrap();
    assert_eq!(entry.status, "COMPLETED");
    assert_eq!(entry.diff_patch, Some(diff));
    assert_eq!(
        entry.summary,
        Some(job_dir(&fx.data).join("summary").join("summary.md"))
    );
}

#[tokio::test]
async fn unreadable_patch_set_still_records_the_completed_job() {
    let fx = fixture(vec![RemoteJobStatus::Completed]);
    configure(&fx).await;
    fx.api.set_export(
        &ExportContext::ResultArchive,
        zip_bytes(&[
            ("patch/diff.json", br#"{"content": ["#),
            ("summary/summary.md", b"# Upgraded\n"),
        ]),
    );
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();
    fx.orchestrator
        .poll(&RecordingObserver::default(), &CancellationToken::new())
        .await
        .unwrap();

    let artifacts = fx.orchestrator.download_results().await.unwrap();
    assert!(matches!(artifacts.patch_error, Some(DiffError::Parse(_))));
    assert!(artifacts.patches.is_empty());
    assert_eq!(artifacts.diff_patch, None);
    let summary = job_dir(&fx.data).join("summary").join("summary.md");
    assert_eq!(artifacts.summary, Some(summary.clone()));

    fx.orchestrator.record_outcome(Some(&artifacts)).await;
    let entry = fx.orchestrator.history().find("job-1").unwrap().unwrap();
    assert_eq!(entry.status, "COMPLETED");
    assert_eq!(entry.summary, Some(summary));
    assert!(!entry.is_stale());
}

#[tokio::test]
async fn completed_job_without_results_is_marked_for_redownload() {
    let fx = fixture(vec![RemoteJobStatus::Completed]);
    configure(&fx).await;
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();
    fx.orchestrator
        .poll(&RecordingObserver::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(fx.orchestrator.download_results().await.is_err());
    fx.orchestrator.record_outcome(None).await;
    let entry = fx.orchestrator.history().find("job-1").unwrap().unwrap();
    assert!(entry.is_stale());

    // A later session fetches them again.
    fx.api.set_export(
        &ExportContext::ResultArchive,
        zip_bytes(&[("patch/diff.patch", MODIFY_A.as_bytes())]),
    );
    let artifacts = fx.orchestrator.redownload("job-1").await.unwrap();
    assert_eq!(artifacts.patches.len(), 1);
    let entry = fx.orchestrator.history().find("job-1").unwrap().unwrap();
    assert_eq!(entry.status, "COMPLETED");
    assert!(entry.diff_patch.is_some());
}

#[tokio::test]
async fn stop_cancels_polling_and_stops_the_remote_job() {
    let fx = fixture(vec![RemoteJobStatus::Transforming]);
    configure(&fx).await;
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    fx.orchestrator.stop("job-1", &cancel).await.unwrap();
    let err = fx
        .orchestrator
        .poll(&RecordingObserver::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::StoppedByCancellation));
    assert_eq!(*fx.api.stops.lock().unwrap(), vec!["job-1".to_string()]);
    assert_eq!(fx.api.status_calls(), 0);
    assert_eq!(
        fx.orchestrator.job().lock().await.status(),
        JobStatus::Stopped
    );
}

#[tokio::test]
async fn pause_without_dependency_artifact_can_be_rejected() {
    let fx = fixture(vec![RemoteJobStatus::Paused]);
    configure(&fx).await;
    fx.orchestrator
        .submit(&CancellationToken::new())
        .await
        .unwrap();

    let err = fx
        .orchestrator
        .prepare_dependency_resolution(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, HilError::NoDependencyArtifact));

    fx.orchestrator.reject_dependency_pause().await.unwrap();
    assert_eq!(
        fx.api.resumes(),
        vec![("job-1".to_string(), ResumeAction::Rejected)]
    );
}
