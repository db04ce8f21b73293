use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Client-side view of a transformation's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    NotStarted,
    Planning,
    Transforming,
    TransformingPartiallyCompleted,
    WaitingForUserInput,
    Completed,
    PartiallyCompleted,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::NotStarted => "NOT_STARTED",
            JobStatus::Planning => "PLANNING",
            JobStatus::Transforming => "TRANSFORMING",
            JobStatus::TransformingPartiallyCompleted => "TRANSFORMING_PARTIALLY_COMPLETED",
            JobStatus::WaitingForUserInput => "WAITING_FOR_USER_INPUT",
            JobStatus::Completed => "COMPLETED",
            JobStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::PartiallyCompleted
                | JobStatus::Failed
                | JobStatus::Stopped
        )
    }
}

/// Status strings reported by the remote job runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteJobStatus {
    Created,
    Accepted,
    Rejected,
    Started,
    Preparing,
    Prepared,
    Planning,
    Planned,
    Transforming,
    Transformed,
    PartiallyCompleted,
    Completed,
    Failed,
    Stopping,
    Stopped,
    Paused,
    Resumed,
    #[serde(other)]
    Unknown,
}

impl RemoteJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteJobStatus::Created => "CREATED",
            RemoteJobStatus::Accepted => "ACCEPTED",
            RemoteJobStatus::Rejected => "REJECTED",
            RemoteJobStatus::Started => "STARTED",
            RemoteJobStatus::Preparing => "PREPARING",
            RemoteJobStatus::Prepared => "PREPARED",
            RemoteJobStatus::Planning => "PLANNING",
            RemoteJobStatus::Planned => "PLANNED",
            RemoteJobStatus::Transforming => "TRANSFORMING",
            RemoteJobStatus::Transformed => "TRANSFORMED",
            RemoteJobStatus::PartiallyCompleted => "PARTIALLY_COMPLETED",
            RemoteJobStatus::Completed => "COMPLETED",
            RemoteJobStatus::Failed => "FAILED",
            RemoteJobStatus::Stopping => "STOPPING",
            RemoteJobStatus::Stopped => "STOPPED",
            RemoteJobStatus::Paused => "PAUSED",
            RemoteJobStatus::Resumed => "RESUMED",
            RemoteJobStatus::Unknown => "UNKNOWN",
        }
    }

    /// Local status this remote status maps onto, if it moves the local view at all.
    /// `Paused` is resolved by the poll loop, which knows whether the pause needs a human.
    pub fn local_status(self) -> Option<JobStatus> {
        match self {
            RemoteJobStatus::Created
            | RemoteJobStatus::Accepted
            | RemoteJobStatus::Started
            | RemoteJobStatus::Preparing
            | RemoteJobStatus::Prepared
            | RemoteJobStatus::Planning => Some(JobStatus::Planning),
            RemoteJobStatus::Planned
            | RemoteJobStatus::Transforming
            | RemoteJobStatus::Transformed
            | RemoteJobStatus::Resumed => Some(JobStatus::Transforming),
            RemoteJobStatus::PartiallyCompleted => Some(JobStatus::PartiallyCompleted),
            RemoteJobStatus::Completed => Some(JobStatus::Completed),
            RemoteJobStatus::Failed | RemoteJobStatus::Rejected => Some(JobStatus::Failed),
            RemoteJobStatus::Stopping | RemoteJobStatus::Stopped => Some(JobStatus::Stopped),
            RemoteJobStatus::Paused | RemoteJobStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformationType {
    LanguageUpgrade,
    SqlConversion,
}

impl TransformationType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformationType::LanguageUpgrade => "LANGUAGE_UPGRADE",
            TransformationType::SqlConversion => "SQL_CONVERSION",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "LANGUAGE_UPGRADE" => Some(TransformationType::LanguageUpgrade),
            "SQL_CONVERSION" => Some(TransformationType::SqlConversion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JdkVersion {
    Jdk8,
    Jdk11,
    Jdk17,
    Unsupported,
}

impl JdkVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            JdkVersion::Jdk8 => "JDK8",
            JdkVersion::Jdk11 => "JDK11",
            JdkVersion::Jdk17 => "JDK17",
            JdkVersion::Unsupported => "UNSUPPORTED",
        }
    }

    /// Map a class-file major version onto the JDK that emits it.
    pub fn from_class_major(major: u16) -> Self {
        match major {
            52 => JdkVersion::Jdk8,
            55 => JdkVersion::Jdk11,
            61 => JdkVersion::Jdk17,
            _ => JdkVersion::Unsupported,
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().trim_start_matches("JDK") {
            "8" | "1.8" => Some(JdkVersion::Jdk8),
            "11" => Some(JdkVersion::Jdk11),
            "17" => Some(JdkVersion::Jdk17),
            _ => None,
        }
    }

    pub fn is_supported_source(self) -> bool {
        matches!(self, JdkVersion::Jdk8 | JdkVersion::Jdk11)
    }

    pub fn is_supported_target(self) -> bool {
        self == JdkVersion::Jdk17
    }
}

/// Database endpoints for a SQL conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
    pub source_vendor: String,
    pub target_vendor: String,
    pub server_name: String,
    pub schema: String,
    pub metadata_file: PathBuf,
}

/// Everything the user picks before submission. Frozen once the job is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSetup {
    pub transformation_type: TransformationType,
    pub project_name: String,
    pub project_path: PathBuf,
    pub source_jdk: Option<JdkVersion>,
    pub target_jdk: Option<JdkVersion>,
    pub database: Option<DatabaseTarget>,
    pub custom_build_command: Option<String>,
    pub custom_dependency_file: Option<PathBuf>,
    pub java_home: Option<PathBuf>,
}

impl JobSetup {
    pub fn language_upgrade(project_path: PathBuf, source: JdkVersion, target: JdkVersion) -> Self {
        Self {
            transformation_type: TransformationType::LanguageUpgrade,
            project_name: project_name_of(&project_path),
            project_path,
            source_jdk: Some(source),
            target_jdk: Some(target),
            database: None,
            custom_build_command: None,
            custom_dependency_file: None,
            java_home: None,
        }
    }

    pub fn sql_conversion(project_path: PathBuf, database: DatabaseTarget) -> Self {
        Self {
            transformation_type: TransformationType::SqlConversion,
            project_name: project_name_of(&project_path),
            project_path,
            source_jdk: None,
            target_jdk: None,
            database: Some(database),
            custom_build_command: None,
            custom_dependency_file: None,
            java_home: None,
        }
    }

    pub fn is_language_upgrade(&self) -> bool {
        self.transformation_type == TransformationType::LanguageUpgrade
    }
}

pub(crate) fn project_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobStateError {
    #[error("job {0} is already submitted; its settings can no longer change")]
    AlreadySubmitted(String),
    #[error("no transformation has been configured")]
    NotConfigured,
}

/// The one live transformation. Mutated by the orchestrator, read by the controller.
#[derive(Debug, Clone)]
pub struct JobState {
    job_id: String,
    status: JobStatus,
    remote_status: Option<RemoteJobStatus>,
    setup: Option<JobSetup>,
    submitted: bool,
    multiple_diffs: bool,
    plan_rendered: bool,
    build_log: String,
    failure_metadata: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            job_id: String::new(),
            status: JobStatus::NotStarted,
            remote_status: None,
            setup: None,
            submitted: false,
            multiple_diffs: false,
            plan_rendered: false,
            build_log: String::new(),
            failure_metadata: None,
            started_at: None,
        }
    }

    /// Replace whatever came before with a fresh, unsubmitted job.
    pub fn begin(&mut self, setup: JobSetup) {
        *self = Self::new();
        self.setup = Some(setup);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn setup(&self) -> Option<&JobSetup> {
        self.setup.as_ref()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// True between submission and a terminal status.
    pub fn is_running(&self) -> bool {
        self.submitted && !self.status.is_terminal()
    }

    pub fn setup_mut(&mut self) -> Result<&mut JobSetup, JobStateError> {
        if self.submitted {
            return Err(JobStateError::AlreadySubmitted(self.job_id.clone()));
        }
        self.setup.as_mut().ok_or(JobStateError::NotConfigured)
    }

    pub fn mark_submitted(&mut self, job_id: String) -> Result<(), JobStateError> {
        if self.setup.is_none() {
            return Err(JobStateError::NotConfigured);
        }
        if self.submitted {
            return Err(JobStateError::AlreadySubmitted(self.job_id.clone()));
        }
        info!("Transformation job submitted: {}", job_id);
        self.job_id = job_id;
        self.submitted = true;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Returns true when the status actually changed. Terminal statuses are sticky.
    pub fn set_status(&mut self, status: JobStatus) -> bool {
        if self.status == status {
            return false;
        }
        if self.status.is_terminal() {
            warn!(
                "Ignoring status change {} -> {} for finished job {}",
                self.status.as_str(),
                status.as_str(),
                self.job_id
            );
            return false;
        }
        info!(
            "Job {} status {} -> {}",
            self.job_id,
            self.status.as_str(),
            status.as_str()
        );
        self.status = status;
        true
    }

    /// Record the raw remote status. Returns true when it differs from the last one seen.
    pub fn observe_remote_status(&mut self, status: RemoteJobStatus) -> bool {
        if self.remote_status == Some(status) {
            return false;
        }
        self.remote_status = Some(status);
        if let Some(local) = status.local_status() {
            self.set_status(local);
        }
        true
    }

    pub fn multiple_diffs(&self) -> bool {
        self.multiple_diffs
    }

    pub fn set_multiple_diffs(&mut self, value: bool) {
        self.multiple_diffs = value;
    }

    pub fn plan_rendered(&self) -> bool {
        self.plan_rendered
    }

    pub fn mark_plan_rendered(&mut self) {
        self.plan_rendered = true;
    }

    pub fn append_build_log(&mut self, text: &str) {
        self.build_log.push_str(text);
        if !text.ends_with('\n') {
            self.build_log.push('\n');
        }
    }

    /// Drain the build log. The buffer only grows until someone reads it.
    pub fn take_build_log(&mut self) -> String {
        std::mem::take(&mut self.build_log)
    }

    pub fn failure_metadata(&self) -> Option<&str> {
        self.failure_metadata.as_deref()
    }

    pub fn set_failure_metadata(&mut self, metadata: impl Into<String>) {
        self.failure_metadata = Some(metadata.into());
    }
}
