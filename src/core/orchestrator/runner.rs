use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::client_build::ClientBuildContext;
use super::poll::{DEFAULT_DONE_STATUSES, PollOptions, poll_transformation_job};
use super::results::{JobArtifacts, ResultError, download_results};
use super::{JobError, JobObserver};
use crate::core::build::{BuildContext, BuildError, prepare_code_package};
use crate::core::config::TransformConfig;
use crate::core::hil::{HilCoordinator, HilError, HilSession};
use crate::core::history::{
    HistoryEntry, JobHistoryStore, STATUS_FAILED_DOWNLOAD, format_duration, job_artifact_dir,
};
use crate::core::process::ProcessRunner;
use crate::core::remote::{
    DownloadArtifactType, PAUSED_FOR_INPUT, RemoteError, RemoteJobClient, ResumeAction,
    UploadContext,
};
use crate::core::transform::{
    JobSetup, JobStateError, JobStatus, RemoteJobStatus, SharedJobState,
};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    State(#[from] JobStateError),
    #[error("submission was cancelled")]
    Cancelled,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobMetadata<'a> {
    job_id: &'a str,
    submitted_at: String,
    #[serde(flatten)]
    setup: &'a JobSetup,
}

/// Owns the remote client, the shared job, and the history store for one process.
pub struct TransformationOrchestrator {
    client: RemoteJobClient,
    runner: Arc<dyn ProcessRunner>,
    job: SharedJobState,
    history: JobHistoryStore,
    data_dir: PathBuf,
    temp_root: PathBuf,
    maven_command: String,
    poll_interval: Duration,
    client_side_build: bool,
}

impl TransformationOrchestrator {
    pub fn new(
        client: RemoteJobClient,
        runner: Arc<dyn ProcessRunner>,
        job: SharedJobState,
        config: &TransformConfig,
        data_dir: &Path,
        temp_root: &Path,
    ) -> Self {
        Self {
            client,
            runner,
            job,
            history: JobHistoryStore::new(
                data_dir,
                config.history_window_days,
                config.history_max_entries,
            ),
            data_dir: data_dir.to_path_buf(),
            temp_root: temp_root.to_path_buf(),
            maven_command: config.maven_command(),
            poll_interval: config.poll_interval(),
            client_side_build: config.client_side_build,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn job(&self) -> &SharedJobState {
        &self.job
    }

    pub fn client(&self) -> &RemoteJobClient {
        &self.client
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    pub fn history(&self) -> &JobHistoryStore {
        &self.history
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn maven_command(&self) -> &str {
        &self.maven_command
    }

    /// Build, package, upload, and start the configured job. Returns the job id.
    pub async fn submit(&self, cancel: &CancellationToken) -> Result<String, SubmitError> {
        let setup = {
            let mut state = self.job.lock().await;
            state.setup_mut()?.clone()
        };
        let ctx = BuildContext {
            runner: self.runner.as_ref(),
            maven_command: &self.maven_command,
            temp_root: &self.temp_root,
        };
        let package = match prepare_code_package(&setup, &ctx, cancel).await {
            Ok(package) => package,
            Err(e) => {
                if let Some(log) = e.log() {
                    self.job.lock().await.append_build_log(log);
                }
                return Err(e.into());
            }
        };
        if !package.build_log.is_empty() {
            self.job.lock().await.append_build_log(&package.build_log);
        }
        if cancel.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }

        let upload_id = self
            .client
            .upload_file(&package.zip_path, &UploadContext::TransformationSource)
            .await?;
        let job_id = self.client.start_job(&upload_id, &setup).await?;
        self.job.lock().await.mark_submitted(job_id.clone())?;

        let job_dir = job_artifact_dir(&self.data_dir, &setup.project_name, &job_id);
        if let Err(e) = package.keep_copy(&job_dir.join("zipped-code.zip")) {
            warn!("Could not keep uploaded zip for {}: {}", job_id, e);
        }
        if let Err(e) = write_job_files(&job_dir, &job_id, &setup, &package.build_log) {
            warn!("Could not write job metadata for {}: {:#}", job_id, e);
        }
        if let Err(e) = self.history.write(&history_entry(&job_id, &setup)) {
            warn!("Could not record job {} in history: {:#}", job_id, e);
        }
        Ok(job_id)
    }

    /// Poll the submitted job until it is done, paused for input, failed, or cancelled.
    pub async fn poll(
        &self,
        observer: &dyn JobObserver,
        cancel: &CancellationToken,
    ) -> Result<RemoteJobStatus, JobError> {
        let client_build = self.client_side_build.then(|| ClientBuildContext {
            runner: self.runner.clone(),
            maven_command: self.maven_command.clone(),
            temp_root: self.temp_root.clone(),
        });
        let options = PollOptions {
            interval: self.poll_interval,
            done: DEFAULT_DONE_STATUSES,
            client_build: client_build.as_ref(),
        };
        poll_transformation_job(&self.client, &self.job, &options, observer, cancel).await
    }

    /// Download and unpack the finished job's results into its artifact directory.
    pub async fn download_results(&self) -> Result<JobArtifacts, ResultError> {
        let (job_id, project) = {
            let state = self.job.lock().await;
            let project = state
                .setup()
                .map(|s| s.project_name.clone())
                .unwrap_or_default();
            (state.job_id().to_string(), project)
        };
        let job_dir = job_artifact_dir(&self.data_dir, &project, &job_id);
        let artifacts = download_results(&self.client, &job_id, &job_dir).await?;
        self.job
            .lock()
            .await
            .set_multiple_diffs(artifacts.has_multiple_diffs());
        Ok(artifacts)
    }

    /// Write the job's final status, duration, and artifact paths into history.
    pub async fn record_outcome(&self, artifacts: Option<&JobArtifacts>) {
        let (job_id, status, started_at) = {
            let state = self.job.lock().await;
            (
                state.job_id().to_string(),
                state.status(),
                state.started_at(),
            )
        };
        if job_id.is_empty() {
            return;
        }
        let succeeded = matches!(
            status,
            JobStatus::Completed | JobStatus::PartiallyCompleted
        );
        let duration = started_at
            .map(|t| format_duration(Utc::now() - t))
            .unwrap_or_default();
        let result = self.history.update(&job_id, |entry| {
            entry.status = if succeeded && artifacts.is_none() {
                STATUS_FAILED_DOWNLOAD.to_string()
            } else {
                status.as_str().to_string()
            };
            entry.duration = duration;
            if let Some(artifacts) = artifacts {
                entry.diff_patch = artifacts.diff_patch.clone();
                entry.summary = artifacts.summary.clone();
            }
        });
        match result {
            Ok(true) => info!("History updated for {}", job_id),
            Ok(false) => warn!("Job {} has no history row to update", job_id),
            Err(e) => warn!("Could not update history for {}: {:#}", job_id, e),
        }
    }

    /// Stop polling and ask the service to stop the job.
    pub async fn stop(&self, job_id: &str, cancel: &CancellationToken) -> Result<(), RemoteError> {
        cancel.cancel();
        {
            let mut state = self.job.lock().await;
            if state.job_id() == job_id {
                state.set_status(JobStatus::Stopped);
            }
        }
        self.client.stop_job(job_id).await
    }

    /// Start resolving the dependency the paused job could not upgrade on its own.
    pub async fn prepare_dependency_resolution(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HilSession, HilError> {
        let job_id = self.job.lock().await.job_id().to_string();
        let plan = self.client.get_plan(&job_id).await?;
        let artifact = plan
            .find_download_artifact(DownloadArtifactType::DependencyResolution, PAUSED_FOR_INPUT)
            .ok_or(HilError::NoDependencyArtifact)?;
        let coordinator = HilCoordinator::new(
            self.client.clone(),
            self.runner.clone(),
            &self.maven_command,
            &self.temp_root,
        );
        coordinator
            .prepare(&job_id, &artifact.download_artifact_id, cancel)
            .await
    }

    /// Let the paused job continue without the dependency resolved.
    pub async fn reject_dependency_pause(&self) -> Result<(), RemoteError> {
        let job_id = self.job.lock().await.job_id().to_string();
        self.client.resume_job(&job_id, ResumeAction::Rejected).await
    }

    /// Fetch the results of a job from an earlier session again and refresh its history row.
    pub async fn redownload(&self, job_id: &str) -> anyhow::Result<JobArtifacts> {
        let entry = self
            .history
            .find(job_id)?
            .ok_or_else(|| anyhow::anyhow!("job {} is not in the history", job_id))?;
        let report = self.client.get_status(job_id).await?;
        let job_dir = job_artifact_dir(&self.data_dir, &entry.project_name, job_id);
        let artifacts = download_results(&self.client, job_id, &job_dir).await?;
        let status = report
            .status
            .local_status()
            .map(JobStatus::as_str)
            .unwrap_or(report.status.as_str())
            .to_string();
        self.history.update(job_id, |e| {
            e.status = status;
            e.diff_patch = artifacts.diff_patch.clone();
            e.summary = artifacts.summary.clone();
        })?;
        Ok(artifacts)
    }
}

fn history_entry(job_id: &str, setup: &JobSetup) -> HistoryEntry {
    let mut entry = HistoryEntry::new(job_id, &setup.project_name, Utc::now());
    entry.transformation_type = Some(setup.transformation_type.as_str().to_string());
    entry.source_jdk = setup.source_jdk.map(|j| j.as_str().to_string());
    entry.target_jdk = setup.target_jdk.map(|j| j.as_str().to_string());
    entry.custom_dependency_file = setup.custom_dependency_file.clone();
    entry.custom_build_command = setup.custom_build_command.clone();
    entry
}

fn write_job_files(
    job_dir: &Path,
    job_id: &str,
    setup: &JobSetup,
    build_log: &str,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(job_dir)?;
    let metadata = JobMetadata {
        job_id,
        submitted_at: Utc::now().to_rfc3339(),
        setup,
    };
    std::fs::write(
        job_dir.join("metadata.json"),
        serde_json::to_vec_pretty(&metadata)?,
    )?;
    std::fs::write(job_dir.join("buildCommandOutput.log"), build_log)?;
    Ok(())
}
