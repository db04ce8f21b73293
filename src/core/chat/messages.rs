use crate::core::build::BuildError;
use crate::core::diff::DiffError;
use crate::core::hil::HilError;
use crate::core::orchestrator::{JobError, ResultError, SubmitError};
use crate::core::project::SetupError;

/// User-facing outcomes. Setup and build failures are only ever shown through these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    AuthRequired,
    NoOpenProjects,
    NoJavaProjectsFound,
    NoBuildFileFound,
    UnsupportedSourceJdk,
    UnsupportedTargetJdk,
    NoSqlMetadata,
    InvalidSqlMetadata,
    InvalidDependencyFile,
    InvalidProjectSelection,
    JobAlreadyInProgress,
    NoJobRunning,
    UnexpectedInput,
    BuildFailed,
    JavaHomeMismatch,
    InvalidJavaHome,
    UploadFailed,
    StartFailed,
    JobFailed,
    JobStopped,
    StopFailed,
    DownloadFailed,
    NoChangesMade,
    PatchFailed,
    DependencyVersionsNotFound,
    DependencyResolutionFailed,
}

impl MessageKey {
    pub fn text(self) -> &'static str {
        match self {
            MessageKey::AuthRequired => "You need to sign in again before starting a transformation.",
            MessageKey::NoOpenProjects => "Open a Java project to transform.",
            MessageKey::NoJavaProjectsFound => "None of the open folders contain Java source files.",
            MessageKey::NoBuildFileFound => {
                "No pom.xml was found. Only Maven projects can be transformed."
            }
            MessageKey::UnsupportedSourceJdk => {
                "The project's Java version is not supported. Java 8 and 11 projects can be upgraded."
            }
            MessageKey::UnsupportedTargetJdk => "Projects can only be upgraded to Java 17.",
            MessageKey::NoSqlMetadata => "Choose the schema conversion metadata (.sct) file.",
            MessageKey::InvalidSqlMetadata => {
                "The schema conversion metadata file could not be used. Only Oracle to PostgreSQL conversions are supported."
            }
            MessageKey::InvalidDependencyFile => {
                "The custom dependency versions file is not valid."
            }
            MessageKey::InvalidProjectSelection => "That project is not one of the candidates.",
            MessageKey::JobAlreadyInProgress => {
                "A transformation is already in progress. Wait for it to finish or stop it first."
            }
            MessageKey::NoJobRunning => "No transformation is running.",
            MessageKey::UnexpectedInput => "That input is not expected right now.",
            MessageKey::BuildFailed => {
                "The project did not build locally. Fix the build and start a new transformation."
            }
            MessageKey::JavaHomeMismatch => {
                "The project could not be built with the current JDK. Provide the path to a JDK matching the project's Java version."
            }
            MessageKey::InvalidJavaHome => "That path is not a directory. Enter a valid JDK path.",
            MessageKey::UploadFailed => "The project could not be uploaded.",
            MessageKey::StartFailed => "The transformation could not be started.",
            MessageKey::JobFailed => "The transformation failed.",
            MessageKey::JobStopped => "The transformation was stopped.",
            MessageKey::StopFailed => "The transformation could not be stopped.",
            MessageKey::DownloadFailed => "The transformation results could not be downloaded.",
            MessageKey::NoChangesMade => "The transformation finished but made no changes.",
            MessageKey::PatchFailed => "The proposed changes could not be applied to the project.",
            MessageKey::DependencyVersionsNotFound => {
                "No other versions of the dependency were found. The transformation continues without it."
            }
            MessageKey::DependencyResolutionFailed => {
                "The dependency could not be updated. The transformation continues without it."
            }
        }
    }
}

impl From<&SetupError> for MessageKey {
    fn from(e: &SetupError) -> Self {
        match e {
            SetupError::NoOpenProjects => MessageKey::NoOpenProjects,
            SetupError::NoJavaProjectsFound => MessageKey::NoJavaProjectsFound,
            SetupError::NoBuildFileFound => MessageKey::NoBuildFileFound,
            SetupError::UnsupportedSourceJdk(_) => MessageKey::UnsupportedSourceJdk,
            SetupError::UnsupportedTargetJdk(_) => MessageKey::UnsupportedTargetJdk,
            SetupError::NoSqlMetadata(_) => MessageKey::NoSqlMetadata,
            SetupError::InvalidSqlMetadata(_) => MessageKey::InvalidSqlMetadata,
            SetupError::InvalidDependencyFile(_) => MessageKey::InvalidDependencyFile,
        }
    }
}

impl From<&BuildError> for MessageKey {
    fn from(e: &BuildError) -> Self {
        match e {
            BuildError::JavaHomeMismatch { .. } => MessageKey::JavaHomeMismatch,
            BuildError::Setup(setup) => setup.into(),
            _ => MessageKey::BuildFailed,
        }
    }
}

impl From<&SubmitError> for MessageKey {
    fn from(e: &SubmitError) -> Self {
        match e {
            SubmitError::Build(build) => build.into(),
            SubmitError::Remote(remote) if remote.operation == "StartTransformation" => {
                MessageKey::StartFailed
            }
            SubmitError::Remote(_) => MessageKey::UploadFailed,
            SubmitError::State(_) => MessageKey::JobAlreadyInProgress,
            SubmitError::Cancelled => MessageKey::JobStopped,
        }
    }
}

impl From<&JobError> for MessageKey {
    fn from(e: &JobError) -> Self {
        match e {
            JobError::StoppedByCancellation => MessageKey::JobStopped,
            JobError::Stopped { .. } | JobError::Remote(_) => MessageKey::JobFailed,
        }
    }
}

impl From<&DiffError> for MessageKey {
    fn from(e: &DiffError) -> Self {
        match e {
            DiffError::EmptyPatch | DiffError::NoPatchesFound(_) => MessageKey::NoChangesMade,
            _ => MessageKey::PatchFailed,
        }
    }
}

impl From<&ResultError> for MessageKey {
    fn from(e: &ResultError) -> Self {
        match e {
            ResultError::Remote(_) | ResultError::Archive(_) => MessageKey::DownloadFailed,
        }
    }
}

impl From<&HilError> for MessageKey {
    fn from(e: &HilError) -> Self {
        match e {
            HilError::AlternateDependencyVersionsNotFound { .. } => {
                MessageKey::DependencyVersionsNotFound
            }
            _ => MessageKey::DependencyResolutionFailed,
        }
    }
}

