mod job;
mod session;

pub use job::{
    DatabaseTarget, JdkVersion, JobSetup, JobState, JobStateError, JobStatus, RemoteJobStatus,
    TransformationType,
};
pub(crate) use job::project_name_of;
pub use session::{ConversationState, InvalidTransition, SessionState, can_transition};

use std::sync::Arc;
use tokio::sync::Mutex;

/// The single job shared between the controller and the background job task.
pub type SharedJobState = Arc<Mutex<JobState>>;

pub fn shared_job_state() -> SharedJobState {
    Arc::new(Mutex::new(JobState::new()))
}

#[cfg(test)]
mod tests;
