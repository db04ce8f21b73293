use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::core::remote::RetryPolicy;
use crate::platform::{NativePlatform, Platform};

#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Run server-requested builds locally while the job is paused.
    #[serde(default = "default_true")]
    pub client_side_build: bool,

    #[serde(default = "default_true")]
    pub sql_conversion_enabled: bool,

    #[serde(default = "default_history_window_days")]
    pub history_window_days: i64,

    #[serde(default = "default_history_max_entries")]
    pub history_max_entries: usize,

    #[serde(default = "default_max_process_output_bytes")]
    pub max_process_output_bytes: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maven executable used when the project has no wrapper script.
    #[serde(default)]
    pub maven_command: Option<String>,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_upload_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_endpoint() -> String {
    "https://codewhisperer.us-east-1.amazonaws.com".to_string()
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_history_window_days() -> i64 {
    30
}
fn default_history_max_entries() -> usize {
    10
}
fn default_max_process_output_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_upload_attempts() -> u32 {
    4
}
fn default_upload_base_delay_ms() -> u64 {
    1000
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_upload_attempts(),
            base_delay_ms: default_upload_base_delay_ms(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            poll_interval_secs: default_poll_interval_secs(),
            client_side_build: true,
            sql_conversion_enabled: true,
            history_window_days: default_history_window_days(),
            history_max_entries: default_history_max_entries(),
            max_process_output_bytes: default_max_process_output_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            maven_command: None,
            upload: UploadConfig::default(),
        }
    }
}

impl TransformConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join("transform.toml");
        if !config_path.exists() {
            info!("No transform.toml found, using defaults.");
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: TransformConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        info!(
            "Loaded transform config: endpoint={}, poll={}s, client_side_build={}",
            config.endpoint, config.poll_interval_secs, config.client_side_build
        );
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn maven_command(&self) -> String {
        self.maven_command
            .clone()
            .unwrap_or_else(|| NativePlatform::maven_executable().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TransformConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.history_window_days, 30);
        assert_eq!(config.history_max_entries, 10);
        assert_eq!(config.upload.max_attempts, 4);
        assert!(config.client_side_build);
    }

    #[tokio::test]
    async fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("transform.toml"),
            "poll_interval_secs = 2\nclient_side_build = false\n\n[upload]\nbase_delay_ms = 10\n",
        )
        .unwrap();
        let config = TransformConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert!(!config.client_side_build);
        assert_eq!(config.upload.base_delay_ms, 10);
        assert_eq!(config.upload.max_attempts, 4);
        assert_eq!(
            config.upload.retry_policy().base_delay,
            Duration::from_millis(10)
        );
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("transform.toml"), "poll_interval_secs = \"soon\"").unwrap();
        assert!(TransformConfig::load(dir.path()).await.is_err());
    }
}
