//! Drives one submitted transformation from upload to downloaded results.
//!
//! - [poll]: the status loop and its stop/pause/done rules
//! - [client_build]: server-requested builds run against a private copy of the project
//! - [plan]: markdown rendering of the remote plan
//! - [results]: result archive download and unpacking
//! - [runner]: [TransformationOrchestrator], which ties the above to the job state and history

mod client_build;
mod plan;
mod poll;
mod results;
mod runner;

pub use client_build::{ClientBuildContext, run_client_build};
pub use plan::render_plan;
pub use poll::{
    DEFAULT_DONE_STATUSES, FAILURE_STATUSES, PLAN_READY_STATUSES, PollOptions,
    poll_transformation_job,
};
pub use results::{JobArtifacts, ResultError, download_results};
pub use runner::{SubmitError, TransformationOrchestrator};

use crate::core::remote::RemoteError;
use crate::core::transform::{JobStatus, RemoteJobStatus};

/// Why a poll ended without reaching a done status.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("transformation job stopped with status {}", .status.as_str())]
    Stopped {
        status: RemoteJobStatus,
        reason: Option<String>,
    },
    #[error("transformation job was stopped by the user")]
    StoppedByCancellation,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Receives progress from the poll loop. Calls are made on the polling task.
pub trait JobObserver: Send + Sync {
    fn status_changed(&self, remote: RemoteJobStatus, local: JobStatus);
    fn plan_ready(&self, markdown: &str);
}

#[cfg(test)]
mod tests;
