use std::path::PathBuf;

use crate::core::hil::{HilError, HilSession};
use crate::core::orchestrator::{JobArtifacts, JobError, ResultError, SubmitError};
use crate::core::transform::{JdkVersion, RemoteJobStatus, TransformationType};

/// The user's answers to the project-selection prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectForm {
    pub project_path: PathBuf,
    pub source_jdk: Option<JdkVersion>,
    pub target_jdk: Option<JdkVersion>,
    /// Schema-conversion metadata, for SQL conversions.
    pub sql_metadata: Option<PathBuf>,
    pub schema: Option<String>,
    pub custom_build_command: Option<String>,
    pub custom_dependency_file: Option<PathBuf>,
}

/// Everything the controller reacts to. User actions come from the chat surface;
/// the rest are posted back by the controller's own background tasks, tagged with
/// the run they belong to.
#[derive(Debug)]
pub enum ChatEvent {
    TransformRequested {
        tab: String,
        folders: Vec<PathBuf>,
    },
    /// Drop whatever the tab was doing and start over.
    StartNew {
        tab: String,
        folders: Vec<PathBuf>,
    },
    ObjectiveSelected {
        tab: String,
        objective: TransformationType,
    },
    FreeText {
        tab: String,
        text: String,
    },
    ProjectConfirmed {
        tab: String,
        form: ProjectForm,
    },
    JavaHomeProvided {
        tab: String,
        path: PathBuf,
    },
    HilVersionSelected {
        tab: String,
        version: String,
    },
    HilCancelled {
        tab: String,
    },
    StopRequested {
        tab: String,
    },
    PatchAccepted {
        tab: String,
    },
    PatchRejected {
        tab: String,
    },
    /// Leave one file of the patch under review untouched when it is accepted.
    FileRejected {
        tab: String,
        path: PathBuf,
    },
    TabClosed {
        tab: String,
    },

    SubmissionFinished {
        run: u64,
        result: Result<String, SubmitError>,
    },
    PollFinished {
        run: u64,
        result: Result<RemoteJobStatus, JobError>,
    },
    HilPrepared {
        run: u64,
        result: Result<HilSession, HilError>,
    },
    HilFinished {
        run: u64,
        result: Result<(), HilError>,
    },
    ResultsReady {
        run: u64,
        result: Result<JobArtifacts, ResultError>,
    },
}
