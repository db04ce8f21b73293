mod client_build;
mod runner;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::JobObserver;
use crate::core::remote::{
    DownloadArtifact, DownloadArtifactType, PlanStep, ProgressUpdate, RemoteJobClient,
    RetryPolicy, TransformationPlan,
};
use crate::core::testing::{FakeApi, FakeTransport};
use crate::core::transform::{
    JdkVersion, JobSetup, JobStatus, RemoteJobStatus, SharedJobState, shared_job_state,
};

pub(super) const TICK: Duration = Duration::from_millis(1);

pub(super) const MODIFY_A: &str = "\
--- a/src/main/java/A.java
+++ b/src/main/java/A.java
@@ -1 +1 @@
-class A {}
\\ No newline at end of file
+class A { int x; }
\\ No newline at end of file
";

#[derive(Default)]
pub(super) struct RecordingObserver {
    pub statuses: Mutex<Vec<(RemoteJobStatus, JobStatus)>>,
    pub plans: Mutex<Vec<String>>,
}

impl JobObserver for RecordingObserver {
    fn status_changed(&self, remote: RemoteJobStatus, local: JobStatus) {
        self.statuses.lock().unwrap().push((remote, local));
    }

    fn plan_ready(&self, markdown: &str) {
        self.plans.lock().unwrap().push(markdown.to_string());
    }
}

pub(super) fn client(api: &Arc<FakeApi>) -> RemoteJobClient {
    RemoteJobClient::new(
        api.clone(),
        Arc::new(FakeTransport::new(&[])),
        RetryPolicy::default(),
    )
}

pub(super) fn upgrade_setup(project: PathBuf) -> JobSetup {
    JobSetup::language_upgrade(project, JdkVersion::Jdk8, JdkVersion::Jdk17)
}

/// A job that has already been submitted as `job-1`.
pub(super) async fn submitted_job(setup: JobSetup) -> SharedJobState {
    let job = shared_job_state();
    {
        let mut state = job.lock().await;
        state.begin(setup);
        state.mark_submitted("job-1".to_string()).unwrap();
    }
    job
}

/// A plan whose only progress update asks for a client-side build.
pub(super) fn client_build_plan(artifact_id: &str) -> TransformationPlan {
    TransformationPlan {
        steps: vec![PlanStep {
            id: "1".to_string(),
            name: "Build the upgraded code".to_string(),
            description: None,
            status: None,
            progress_updates: vec![ProgressUpdate {
                name: "Local build".to_string(),
                status: crate::core::remote::AWAITING_CLIENT_ACTION.to_string(),
                description: None,
                download_artifacts: vec![DownloadArtifact {
                    download_artifact_id: artifact_id.to_string(),
                    download_artifact_type: DownloadArtifactType::ClientInstructions,
                }],
            }],
        }],
    }
}
