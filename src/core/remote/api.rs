use async_trait::async_trait;
use bytes::Bytes;

use super::{
    ExportContext, JobStatusReport, RemoteError, ResumeAction, StartJobRequest,
    TransformationPlan, UploadContext, UploadDestination,
};

/// The remote job runner's request/response operations.
#[async_trait]
pub trait TransformApi: Send + Sync {
    async fn create_upload_url(
        &self,
        checksum: &str,
        context: &UploadContext,
    ) -> Result<UploadDestination, RemoteError>;

    /// Returns the new job id.
    async fn start_job(&self, request: &StartJobRequest) -> Result<String, RemoteError>;

    async fn get_status(&self, job_id: &str) -> Result<JobStatusReport, RemoteError>;

    async fn get_plan(&self, job_id: &str) -> Result<TransformationPlan, RemoteError>;

    async fn stop_job(&self, job_id: &str) -> Result<(), RemoteError>;

    async fn resume_job(&self, job_id: &str, action: ResumeAction) -> Result<(), RemoteError>;

    /// Raw zip bytes of the requested archive.
    async fn export_archive(
        &self,
        job_id: &str,
        context: &ExportContext,
    ) -> Result<Bytes, RemoteError>;
}

/// The raw artifact PUT. Returns the HTTP status; retry decisions live above it.
#[async_trait]
pub trait ArtifactTransport: Send + Sync {
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        headers: &[(String, String)],
    ) -> Result<u16, RemoteError>;
}
