use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::transform::RemoteJobStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDestination {
    pub upload_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub kms_key_arn: Option<String>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
}

/// What an uploaded artifact is for. The remote side routes on this tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadContext {
    TransformationSource,
    #[serde(rename_all = "camelCase")]
    ClientBuildResult {
        job_id: String,
        artifact_id: String,
    },
    #[serde(rename_all = "camelCase")]
    DependencyResolution { job_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub upload_id: String,
    pub transformation_type: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResumeAction {
    Completed,
    Rejected,
}

/// Which archive to export for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportContext {
    ResultArchive,
    ClientInstructions { artifact_id: String },
    DependencyResolution { artifact_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadArtifactType {
    ClientInstructions,
    BuiltJars,
    Logs,
    GeneratedCode,
    DependencyResolution,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadArtifact {
    pub download_artifact_id: String,
    pub download_artifact_type: DownloadArtifactType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub download_artifacts: Vec<DownloadArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress_updates: Vec<ProgressUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationPlan {
    #[serde(default, alias = "transformationSteps")]
    pub steps: Vec<PlanStep>,
}

/// A table embedded as JSON in a progress update description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTable {
    pub name: String,
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub rows: Vec<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct TaggedTable {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    table: PlanTable,
}

pub const AWAITING_CLIENT_ACTION: &str = "AWAITING_CLIENT_ACTION";
pub const PAUSED_FOR_INPUT: &str = "PAUSED";

impl TransformationPlan {
    /// Latest artifact of `kind` attached to a progress update in state `update_status`.
    pub fn find_download_artifact(
        &self,
        kind: DownloadArtifactType,
        update_status: &str,
    ) -> Option<&DownloadArtifact> {
        self.steps
            .iter()
            .rev()
            .flat_map(|step| step.progress_updates.iter().rev())
            .filter(|update| update.status == update_status)
            .flat_map(|update| update.download_artifacts.iter())
            .find(|artifact| artifact.download_artifact_type == kind)
    }

    /// Sub-reports rendered as tables, in plan order.
    pub fn tables(&self) -> Vec<PlanTable> {
        self.steps
            .iter()
            .flat_map(|step| step.progress_updates.iter())
            .filter_map(|update| update.description.as_deref())
            .filter_map(|desc| serde_json::from_str::<TaggedTable>(desc).ok())
            .filter(|tagged| tagged.kind == "table")
            .map(|tagged| tagged.table)
            .collect()
    }
}
