use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{
    ArtifactTransport, ExportContext, JobStatusReport, RemoteError, ResumeAction,
    StartJobRequest, TransformApi, TransformationPlan, UploadContext, UploadDestination,
};

const REQUEST_ID_HEADER: &str = "x-amzn-requestid";

/// JSON-over-HTTP client for the transformation service. Every operation is a
/// POST to `{base}/{OperationName}`.
pub struct HttpTransformApi {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartJobResponse {
    transformation_job_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetJobResponse {
    transformation_job: JobStatusReport,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPlanResponse {
    transformation_plan: TransformationPlan,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

impl HttpTransformApi {
    pub fn new(base_url: &str, timeout: Duration, bearer_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }

    async fn send(&self, operation: &str, body: &Value) -> Result<reqwest::Response, RemoteError> {
        let url = format!("{}/{}", self.base_url, operation);
        debug!("POST {}", url);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::new(operation, e.to_string()))?;

        let request_id = request_id(&response);

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(text);
            return Err(RemoteError::new(operation, message)
                .with_status(status)
                .with_request_id(request_id));
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T, RemoteError> {
        let response = self.send(operation, &body).await?;
        let request_id = request_id(&response);
        response.json::<T>().await.map_err(|e| {
            RemoteError::new(operation, format!("failed to parse response: {}", e))
                .with_request_id(request_id)
        })
    }
}

fn request_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl TransformApi for HttpTransformApi {
    async fn create_upload_url(
        &self,
        checksum: &str,
        context: &UploadContext,
    ) -> Result<UploadDestination, RemoteError> {
        self.call(
            "CreateUploadUrl",
            json!({
                "contentChecksum": checksum,
                "contentChecksumType": "SHA_256",
                "uploadContext": context,
            }),
        )
        .await
    }

    async fn start_job(&self, request: &StartJobRequest) -> Result<String, RemoteError> {
        let body = serde_json::to_value(request)
            .map_err(|e| RemoteError::new("StartTransformation", e.to_string()))?;
        let response: StartJobResponse = self.call("StartTransformation", body).await?;
        Ok(response.transformation_job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobStatusReport, RemoteError> {
        let response: GetJobResponse = self
            .call("GetTransformation", json!({ "transformationJobId": job_id }))
            .await?;
        Ok(response.transformation_job)
    }

    async fn get_plan(&self, job_id: &str) -> Result<TransformationPlan, RemoteError> {
        let response: GetPlanResponse = self
            .call("GetTransformationPlan", json!({ "transformationJobId": job_id }))
            .await?;
        Ok(response.transformation_plan)
    }

    async fn stop_job(&self, job_id: &str) -> Result<(), RemoteError> {
        self.send("StopTransformation", &json!({ "transformationJobId": job_id }))
            .await?;
        Ok(())
    }

    async fn resume_job(&self, job_id: &str, action: ResumeAction) -> Result<(), RemoteError> {
        self.send(
            "ResumeTransformation",
            &json!({ "transformationJobId": job_id, "userActionStatus": action }),
        )
        .await?;
        Ok(())
    }

    async fn export_archive(
        &self,
        job_id: &str,
        context: &ExportContext,
    ) -> Result<Bytes, RemoteError> {
        let export_context = match context {
            ExportContext::ResultArchive => Value::Null,
            ExportContext::ClientInstructions { artifact_id } => json!({
                "transformationExportContext": {
                    "downloadArtifactId": artifact_id,
                    "downloadArtifactType": "ClientInstructions",
                }
            }),
            ExportContext::DependencyResolution { artifact_id } => json!({
                "transformationExportContext": {
                    "downloadArtifactId": artifact_id,
                    "downloadArtifactType": "DependencyResolution",
                }
            }),
        };
        let mut body = json!({ "exportId": job_id, "exportIntent": "TRANSFORMATION" });
        if !export_context.is_null() {
            body["exportContext"] = export_context;
        }
        let response = self.send("ExportResultArchive", &body).await?;
        response
            .bytes()
            .await
            .map_err(|e| RemoteError::new("ExportResultArchive", e.to_string()))
    }
}

/// Plain PUT against a pre-signed URL.
pub struct HttpArtifactTransport {
    client: Client,
}

impl HttpArtifactTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactTransport for HttpArtifactTransport {
    async fn put(
        &self,
        url: &str,
        body: Bytes,
        headers: &[(String, String)],
    ) -> Result<u16, RemoteError> {
        let mut request = self.client.put(url).body(body);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::new("UploadArtifact", e.to_string()))?;
        Ok(response.status().as_u16())
    }
}
