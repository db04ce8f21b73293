use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client_build::{ClientBuildContext, run_client_build};
use super::plan::render_plan;
use super::{JobError, JobObserver};
use crate::core::remote::{AWAITING_CLIENT_ACTION, DownloadArtifactType, RemoteJobClient};
use crate::core::transform::{JobStatus, RemoteJobStatus, SharedJobState};

/// Remote statuses that end the job unsuccessfully.
pub const FAILURE_STATUSES: &[RemoteJobStatus] = &[
    RemoteJobStatus::Failed,
    RemoteJobStatus::Stopping,
    RemoteJobStatus::Stopped,
    RemoteJobStatus::Rejected,
];

/// Statuses at which the remote plan exists.
pub const PLAN_READY_STATUSES: &[RemoteJobStatus] = &[
    RemoteJobStatus::Planned,
    RemoteJobStatus::Transforming,
    RemoteJobStatus::Transformed,
    RemoteJobStatus::PartiallyCompleted,
    RemoteJobStatus::Completed,
];

pub const DEFAULT_DONE_STATUSES: &[RemoteJobStatus] = &[
    RemoteJobStatus::Completed,
    RemoteJobStatus::PartiallyCompleted,
];

pub struct PollOptions<'a> {
    pub interval: Duration,
    /// Statuses that end the loop normally.
    pub done: &'a [RemoteJobStatus],
    /// Set when paused jobs may ask for a local build.
    pub client_build: Option<&'a ClientBuildContext>,
}

/// Poll `job` until it is done, paused for input, failed, or cancelled.
///
/// Returns the last observed remote status. `Paused` means the job is waiting for a human;
/// the job state is then `WaitingForUserInput`.
pub async fn poll_transformation_job(
    client: &RemoteJobClient,
    job: &SharedJobState,
    options: &PollOptions<'_>,
    observer: &dyn JobObserver,
    cancel: &CancellationToken,
) -> Result<RemoteJobStatus, JobError> {
    let (job_id, is_upgrade) = {
        let state = job.lock().await;
        let is_upgrade = state.setup().is_some_and(|s| s.is_language_upgrade());
        (state.job_id().to_string(), is_upgrade)
    };
    let mut handled_builds: HashSet<String> = HashSet::new();
    info!("Polling transformation job {}", job_id);

    loop {
        if cancel.is_cancelled() {
            info!("Polling of {} cancelled", job_id);
            return Err(JobError::StoppedByCancellation);
        }

        let report = client.get_status(&job_id).await?;
        let status = report.status;
        let changed = {
            let mut state = job.lock().await;
            let changed = state.observe_remote_status(status);
            if changed {
                observer.status_changed(status, state.status());
            }
            changed
        };

        if is_upgrade && PLAN_READY_STATUSES.contains(&status) {
            render_plan_once(client, job, &job_id, observer).await;
        }

        if status == RemoteJobStatus::Paused {
            if let Some(ctx) = options.client_build.filter(|_| is_upgrade) {
                match client.get_plan(&job_id).await {
                    Ok(plan) => {
                        let pending = plan
                            .find_download_artifact(
                                DownloadArtifactType::ClientInstructions,
                                AWAITING_CLIENT_ACTION,
                            )
                            .map(|a| a.download_artifact_id.clone());
                        if let Some(artifact_id) = pending {
                            // A failed build stays pending and is retried on the next paused tick.
                            if !handled_builds.contains(&artifact_id) {
                                match run_client_build(client, job, &artifact_id, ctx, cancel).await
                                {
                                    Ok(()) => {
                                        handled_builds.insert(artifact_id);
                                    }
                                    Err(e) => {
                                        warn!("Client-side build for {} failed: {:#}", job_id, e)
                                    }
                                }
                            } else {
                                debug!("Client build {} already handled, waiting", artifact_id);
                            }
                            wait(options.interval, cancel).await;
                            continue;
                        }
                    }
                    Err(e) => {
                        warn!("Could not read plan of paused job {}: {}", job_id, e);
                        wait(options.interval, cancel).await;
                        continue;
                    }
                }
            }
            if changed {
                let mut state = job.lock().await;
                if state.set_status(JobStatus::WaitingForUserInput) {
                    observer.status_changed(status, JobStatus::WaitingForUserInput);
                }
                info!("Job {} paused for user input", job_id);
                return Ok(status);
            }
        }

        if FAILURE_STATUSES.contains(&status) {
            let reason = report.reason;
            job.lock().await.set_failure_metadata(format!(
                "{} {}",
                status.as_str(),
                reason.as_deref().unwrap_or("")
            ));
            warn!(
                "Job {} ended with {}: {}",
                job_id,
                status.as_str(),
                reason.as_deref().unwrap_or("no reason given")
            );
            return Err(JobError::Stopped { status, reason });
        }

        if options.done.contains(&status) {
            info!("Job {} reached {}", job_id, status.as_str());
            return Ok(status);
        }

        wait(options.interval, cancel).await;
    }
}

async fn render_plan_once(
    client: &RemoteJobClient,
    job: &SharedJobState,
    job_id: &str,
    observer: &dyn JobObserver,
) {
    if job.lock().await.plan_rendered() {
        return;
    }
    match client.get_plan(job_id).await {
        Ok(plan) => {
            let markdown = render_plan(&plan);
            job.lock().await.mark_plan_rendered();
            observer.plan_ready(&markdown);
        }
        Err(e) => warn!("Transformation plan for {} not available yet: {}", job_id, e),
    }
}

async fn wait(interval: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = cancel.cancelled() => {}
    }
}
