use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use super::{ArtifactTransport, RemoteError, UploadDestination};

/// Statuses worth another attempt. Anything else is final.
pub const RETRIABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub(crate) fn upload_headers(destination: &UploadDestination, checksum: &str) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/zip".to_string()),
        ("x-amz-checksum-sha256".to_string(), checksum.to_string()),
    ];
    if let Some(kms) = &destination.kms_key_arn
        && !kms.is_empty()
    {
        headers.push((
            "x-amz-server-side-encryption".to_string(),
            "aws:kms".to_string(),
        ));
        headers.push((
            "x-amz-server-side-encryption-aws-kms-key-id".to_string(),
            kms.clone(),
        ));
    }
    let mut extra: Vec<_> = destination.request_headers.iter().collect();
    extra.sort();
    for (key, value) in extra {
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(key)) {
            headers.push((key.clone(), value.clone()));
        }
    }
    headers
}

/// PUT the artifact, retrying only the allow-listed statuses with exponential backoff.
pub async fn upload_with_retry(
    transport: &dyn ArtifactTransport,
    policy: &RetryPolicy,
    destination: &UploadDestination,
    body: Bytes,
    checksum: &str,
) -> Result<(), RemoteError> {
    let headers = upload_headers(destination, checksum);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let status = transport
            .put(&destination.upload_url, body.clone(), &headers)
            .await?;
        if status == 200 {
            info!("Upload {} succeeded on attempt {}", destination.upload_id, attempt);
            return Ok(());
        }
        if !RETRIABLE_STATUSES.contains(&status) {
            return Err(
                RemoteError::new("UploadArtifact", format!("upload rejected with status {}", status))
                    .with_status(status),
            );
        }
        if attempt >= max_attempts {
            return Err(RemoteError::new(
                "UploadArtifact",
                format!("upload still failing with status {} after {} attempts", status, attempt),
            )
            .with_status(status));
        }
        let delay = policy.backoff(attempt);
        warn!(
            "Upload {} attempt {} returned {}, retrying in {:?}",
            destination.upload_id, attempt, status, delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
