use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::core::orchestrator::{
    ClientBuildContext, DEFAULT_DONE_STATUSES, PollOptions, poll_transformation_job,
};
use crate::core::remote::{ExportContext, ResumeAction, UploadContext};
use crate::core::process::ProcessError;
use crate::core::testing::{FakeRunner, ok_output, write_maven_project, zip_bytes};

fn instructions_export() -> ExportContext {
    ExportContext::ClientInstructions {
        artifact_id: "art-1".to_string(),
    }
}

#[tokio::test]
async fn paused_job_is_built_locally_then_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("demo");
    write_maven_project(&project);
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();

    let api = Arc::new(FakeApi::new(vec![
        RemoteJobStatus::Transforming,
        RemoteJobStatus::Paused,
        RemoteJobStatus::Paused,
        RemoteJobStatus::Resumed,
        RemoteJobStatus::Completed,
    ]));
    api.set_plan(client_build_plan("art-1"));
    api.set_export(
        &instructions_export(),
        zip_bytes(&[("patch/diff.patch", MODIFY_A.as_bytes())]),
    );
    // The build reports the patched source it was run against.
    let runner = Arc::new(FakeRunner::new(|spec| {
        let source = std::fs::read_to_string(spec.cwd.join("src/main/java/A.java")).unwrap();
        Ok(ok_output(&source))
    }));
    let ctx = ClientBuildContext {
        runner: runner.clone(),
        maven_command: "mvn".to_string(),
        temp_root: temp.clone(),
    };
    let job = submitted_job(upgrade_setup(project.clone())).await;
    let options = PollOptions {
        interval: TICK,
        done: DEFAULT_DONE_STATUSES,
        client_build: Some(&ctx),
    };

    let status = poll_transformation_job(
        &client(&api),
        &job,
        &options,
        &RecordingObserver::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, RemoteJobStatus::Completed);
    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].args, vec!["clean", "install", "-q"]);
    assert!(job.lock().await.take_build_log().contains("class A { int x; }"));

    assert_eq!(
        api.uploads(),
        vec![UploadContext::ClientBuildResult {
            job_id: "job-1".to_string(),
            artifact_id: "art-1".to_string(),
        }]
    );
    assert_eq!(
        api.resumes(),
        vec![("job-1".to_string(), ResumeAction::Completed)]
    );
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
    assert_eq!(
        std::fs::read_to_string(project.join("src/main/java/A.java")).unwrap(),
        "class A {}"
    );
}

#[tokio::test]
async fn failed_client_build_does_not_stop_polling() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("demo");
    write_maven_project(&project);
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();

    // No instructions archive is available, so the local build fails early.
    let api = Arc::new(FakeApi::new(vec![
        RemoteJobStatus::Paused,
        RemoteJobStatus::Paused,
        RemoteJobStatus::Completed,
    ]));
    api.set_plan(client_build_plan("art-1"));
    let runner = Arc::new(FakeRunner::succeeding());
    let ctx = ClientBuildContext {
        runner: runner.clone(),
        maven_command: "mvn".to_string(),
        temp_root: temp.clone(),
    };
    let job = submitted_job(upgrade_setup(project)).await;
    let options = PollOptions {
        interval: TICK,
        done: DEFAULT_DONE_STATUSES,
        client_build: Some(&ctx),
    };

    let status = poll_transformation_job(
        &client(&api),
        &job,
        &options,
        &RecordingObserver::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, RemoteJobStatus::Completed);
    assert!(runner.calls().is_empty());
    assert!(api.resumes().is_empty());
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}

#[tokio::test]
async fn client_build_is_retried_after_a_failed_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("demo");
    write_maven_project(&project);
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();

    let api = Arc::new(FakeApi::new(vec![
        RemoteJobStatus::Paused,
        RemoteJobStatus::Paused,
        RemoteJobStatus::Paused,
        RemoteJobStatus::Completed,
    ]));
    api.set_plan(client_build_plan("art-1"));
    api.set_export(
        &instructions_export(),
        zip_bytes(&[("patch/diff.patch", MODIFY_A.as_bytes())]),
    );
    // Maven cannot be started the first time, then works.
    let attempts = AtomicUsize::new(0);
    let runner = Arc::new(FakeRunner::new(move |spec| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(ProcessError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::other("mvn not found"),
            })
        } else {
            Ok(ok_output("BUILD SUCCESS"))
        }
    }));
    let ctx = ClientBuildContext {
        runner: runner.clone(),
        maven_command: "mvn".to_string(),
        temp_root: temp.clone(),
    };
    let job = submitted_job(upgrade_setup(project)).await;
    let options = PollOptions {
        interval: TICK,
        done: DEFAULT_DONE_STATUSES,
        client_build: Some(&ctx),
    };

    let status = poll_transformation_job(
        &client(&api),
        &job,
        &options,
        &RecordingObserver::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, RemoteJobStatus::Completed);
    assert_eq!(runner.calls().len(), 2);
    assert_eq!(
        api.resumes(),
        vec![("job-1".to_string(), ResumeAction::Completed)]
    );
    assert_eq!(std::fs::read_dir(&temp).unwrap().count(), 0);
}
