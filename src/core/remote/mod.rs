//! Remote transformation service: the job RPCs plus the artifact upload path.
//!
//! - [api]: the request/response operations as a trait, so the orchestrator can be driven by fakes
//! - [http]: reqwest implementation of that trait and of the raw artifact PUT
//! - [upload]: the retry policy for artifact uploads (the only retried remote call)

mod api;
mod http;
mod models;
mod upload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

pub use api::{ArtifactTransport, TransformApi};
pub use http::{HttpArtifactTransport, HttpTransformApi};
pub use models::{
    AWAITING_CLIENT_ACTION, DownloadArtifact, DownloadArtifactType, ExportContext,
    JobStatusReport, PAUSED_FOR_INPUT, PlanStep, PlanTable, ProgressUpdate, ResumeAction,
    StartJobRequest, TransformationPlan, UploadContext, UploadDestination,
};
pub use upload::{RETRIABLE_STATUSES, RetryPolicy, upload_with_retry};

use crate::core::archive::sha256_base64;
use crate::core::transform::{JdkVersion, JobSetup, TransformationType};

/// Any failed remote call, with the request id when the service sent one.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{operation} failed{}: {message}", request_suffix(.request_id))]
pub struct RemoteError {
    pub operation: String,
    pub request_id: Option<String>,
    pub status: Option<u16>,
    pub message: String,
}

fn request_suffix(request_id: &Option<String>) -> String {
    request_id
        .as_ref()
        .map(|id| format!(" (request id: {})", id))
        .unwrap_or_default()
}

impl RemoteError {
    pub fn new(operation: &str, message: impl Into<String>) -> Self {
        Self {
            operation: operation.to_string(),
            request_id: None,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Uniform front for every remote operation the orchestrator needs.
#[derive(Clone)]
pub struct RemoteJobClient {
    api: Arc<dyn TransformApi>,
    transport: Arc<dyn ArtifactTransport>,
    retry: RetryPolicy,
}

impl RemoteJobClient {
    pub fn new(
        api: Arc<dyn TransformApi>,
        transport: Arc<dyn ArtifactTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            api,
            transport,
            retry,
        }
    }

    pub async fn create_upload_destination(
        &self,
        checksum: &str,
        context: &UploadContext,
    ) -> Result<UploadDestination, RemoteError> {
        self.api.create_upload_url(checksum, context).await
    }

    pub async fn upload_artifact(
        &self,
        destination: &UploadDestination,
        body: Bytes,
        checksum: &str,
    ) -> Result<(), RemoteError> {
        upload_with_retry(
            self.transport.as_ref(),
            &self.retry,
            destination,
            body,
            checksum,
        )
        .await
    }

    /// Checksum, reserve an upload slot, and upload a zip. Returns the upload id.
    pub async fn upload_file(
        &self,
        path: &Path,
        context: &UploadContext,
    ) -> Result<String, RemoteError> {
        let checksum = sha256_base64(path)
            .map_err(|e| RemoteError::new("UploadArtifact", format!("{:#}", e)))?;
        let destination = self.create_upload_destination(&checksum, context).await?;
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| RemoteError::new("UploadArtifact", e.to_string()))?;
        info!(
            "Uploading {} ({} bytes) as {}",
            path.display(),
            body.len(),
            destination.upload_id
        );
        self.upload_artifact(&destination, Bytes::from(body), &checksum)
            .await?;
        Ok(destination.upload_id)
    }

    pub async fn start_job(&self, upload_id: &str, setup: &JobSetup) -> Result<String, RemoteError> {
        let request = start_request(upload_id, setup);
        let job_id = self.api.start_job(&request).await?;
        info!("Started transformation job {}", job_id);
        Ok(job_id)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobStatusReport, RemoteError> {
        self.api.get_status(job_id).await
    }

    pub async fn get_plan(&self, job_id: &str) -> Result<TransformationPlan, RemoteError> {
        self.api.get_plan(job_id).await
    }

    pub async fn stop_job(&self, job_id: &str) -> Result<(), RemoteError> {
        info!("Stopping transformation job {}", job_id);
        self.api.stop_job(job_id).await
    }

    pub async fn resume_job(&self, job_id: &str, action: ResumeAction) -> Result<(), RemoteError> {
        info!("Resuming transformation job {} with {:?}", job_id, action);
        self.api.resume_job(job_id, action).await
    }

    /// Download an archive for the job into `dest_dir`, returning the zip path.
    pub async fn export_result_archive(
        &self,
        job_id: &str,
        context: &ExportContext,
        dest_dir: &Path,
    ) -> Result<PathBuf, RemoteError> {
        let bytes = self.api.export_archive(job_id, context).await?;
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| RemoteError::new("ExportResultArchive", e.to_string()))?;
        let path = dest_dir.join(archive_file_name(context));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| RemoteError::new("ExportResultArchive", e.to_string()))?;
        info!("Downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

fn archive_file_name(context: &ExportContext) -> &'static str {
    match context {
        ExportContext::ResultArchive => "ExportResultArchive.zip",
        ExportContext::ClientInstructions { .. } => "ClientInstructions.zip",
        ExportContext::DependencyResolution { .. } => "DependencyResolution.zip",
    }
}

fn language_name(jdk: Option<JdkVersion>) -> String {
    match jdk {
        Some(JdkVersion::Jdk8) => "JAVA_8",
        Some(JdkVersion::Jdk11) => "JAVA_11",
        Some(JdkVersion::Jdk17) => "JAVA_17",
        Some(JdkVersion::Unsupported) | None => "JAVA",
    }
    .to_string()
}

pub(crate) fn start_request(upload_id: &str, setup: &JobSetup) -> StartJobRequest {
    match setup.transformation_type {
        TransformationType::LanguageUpgrade => StartJobRequest {
            upload_id: upload_id.to_string(),
            transformation_type: TransformationType::LanguageUpgrade.as_str().to_string(),
            source_language: language_name(setup.source_jdk),
            target_language: language_name(setup.target_jdk),
            source_database: None,
            target_database: None,
        },
        TransformationType::SqlConversion => StartJobRequest {
            upload_id: upload_id.to_string(),
            transformation_type: TransformationType::SqlConversion.as_str().to_string(),
            source_language: "SQL".to_string(),
            target_language: "SQL".to_string(),
            source_database: setup
                .database
                .as_ref()
                .map(|d| d.source_vendor.to_ascii_uppercase()),
            target_database: setup
                .database
                .as_ref()
                .map(|d| d.target_vendor.to_ascii_uppercase()),
        },
    }
}

#[cfg(test)]
mod tests;
