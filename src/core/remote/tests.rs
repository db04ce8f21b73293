use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use bytes::Bytes;

use super::*;
use crate::core::testing::{FakeApi, FakeTransport};
use crate::core::transform::{DatabaseTarget, RemoteJobStatus};

fn destination(kms: Option<&str>) -> UploadDestination {
    UploadDestination {
        upload_id: "up-1".to_string(),
        upload_url: "http://uploads.invalid/put".to_string(),
        kms_key_arn: kms.map(str::to_string),
        request_headers: HashMap::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn retries_retriable_statuses_with_growing_backoff() {
    let transport = FakeTransport::new(&[503, 503, 503, 200]);
    upload_with_retry(
        &transport,
        &RetryPolicy::default(),
        &destination(None),
        Bytes::from_static(b"zip"),
        "sum",
    )
    .await
    .unwrap();

    assert_eq!(transport.calls(), 4);
    let seen = transport.seen_at.lock().unwrap().clone();
    let gaps: Vec<Duration> = seen.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert!(gaps.windows(2).all(|g| g[1] > g[0]));
}

#[tokio::test(start_paused = true)]
async fn non_retriable_status_fails_without_another_attempt() {
    let transport = FakeTransport::new(&[403, 200]);
    let err = upload_with_retry(
        &transport,
        &RetryPolicy::default(),
        &destination(None),
        Bytes::from_static(b"zip"),
        "sum",
    )
    .await
    .unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert_eq!(err.status, Some(403));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_attempts() {
    let transport = FakeTransport::new(&[500, 502, 504, 429, 200]);
    let err = upload_with_retry(
        &transport,
        &RetryPolicy::default(),
        &destination(None),
        Bytes::from_static(b"zip"),
        "sum",
    )
    .await
    .unwrap_err();

    assert_eq!(transport.calls(), 4);
    assert_eq!(err.status, Some(429));
}

#[tokio::test]
async fn upload_headers_carry_checksum_and_kms_key() {
    let transport = FakeTransport::new(&[200]);
    upload_with_retry(
        &transport,
        &RetryPolicy::default(),
        &destination(Some("arn:aws:kms:key")),
        Bytes::from_static(b"zip"),
        "c2hh",
    )
    .await
    .unwrap();

    let headers = transport.headers.lock().unwrap().clone();
    let get = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    assert_eq!(get("Content-Type"), Some("application/zip"));
    assert_eq!(get("x-amz-checksum-sha256"), Some("c2hh"));
    assert_eq!(
        get("x-amz-server-side-encryption-aws-kms-key-id"),
        Some("arn:aws:kms:key")
    );
}

#[test]
fn backoff_doubles_from_base() {
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(250),
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(250));
    assert_eq!(policy.backoff(2), Duration::from_millis(500));
    assert_eq!(policy.backoff(3), Duration::from_millis(1000));
}

#[derive(Clone)]
struct PutState {
    hits: Arc<AtomicUsize>,
    checksums: Arc<std::sync::Mutex<Vec<String>>>,
}

async fn flaky_put(State(state): State<PutState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(sum) = headers.get("x-amz-checksum-sha256") {
        state
            .checksums
            .lock()
            .unwrap()
            .push(sum.to_str().unwrap_or_default().to_string());
    }
    assert_eq!(&body[..], b"artifact");
    if n < 3 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[tokio::test]
async fn http_transport_recovers_from_service_unavailable() {
    let state = PutState {
        hits: Arc::new(AtomicUsize::new(0)),
        checksums: Arc::new(std::sync::Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/upload", put(flaky_put))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let transport = HttpArtifactTransport::new(Duration::from_secs(5)).unwrap();
    let mut dest = destination(None);
    dest.upload_url = format!("http://{}/upload", addr);
    let policy = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(5),
    };
    upload_with_retry(
        &transport,
        &policy,
        &dest,
        Bytes::from_static(b"artifact"),
        "c3Vt",
    )
    .await
    .unwrap();

    assert_eq!(state.hits.load(Ordering::SeqCst), 4);
    assert!(state.checksums.lock().unwrap().iter().all(|s| s == "c3Vt"));
}

#[tokio::test]
async fn upload_file_checksums_and_returns_upload_id() {
    let dir = tempfile::tempdir().unwrap();
    let zip = dir.path().join("code.zip");
    std::fs::write(&zip, b"abc").unwrap();

    let api = Arc::new(FakeApi::new(vec![RemoteJobStatus::Created]));
    let transport = Arc::new(FakeTransport::new(&[200]));
    let client = RemoteJobClient::new(api.clone(), transport.clone(), RetryPolicy::default());

    let upload_id = client
        .upload_file(&zip, &UploadContext::TransformationSource)
        .await
        .unwrap();

    assert_eq!(upload_id, "upload-1");
    assert_eq!(api.uploads(), vec![UploadContext::TransformationSource]);
    let headers = transport.headers.lock().unwrap().clone();
    assert!(headers.contains(&(
        "x-amz-checksum-sha256".to_string(),
        "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=".to_string()
    )));
}

#[test]
fn sql_start_request_names_both_databases() {
    let setup = JobSetup::sql_conversion(
        PathBuf::from("/work/app"),
        DatabaseTarget {
            source_vendor: "oracle".to_string(),
            target_vendor: "postgresql".to_string(),
            server_name: "db.local".to_string(),
            schema: "HR".to_string(),
            metadata_file: PathBuf::from("/work/app/meta.sct"),
        },
    );
    let request = start_request("up-9", &setup);
    assert_eq!(request.transformation_type, "SQL_CONVERSION");
    assert_eq!(request.source_database.as_deref(), Some("ORACLE"));
    assert_eq!(request.target_database.as_deref(), Some("POSTGRESQL"));
}

#[test]
fn language_upgrade_request_maps_jdks() {
    let setup = JobSetup::language_upgrade(
        PathBuf::from("/work/app"),
        JdkVersion::Jdk8,
        JdkVersion::Jdk17,
    );
    let request = start_request("up-1", &setup);
    assert_eq!(request.source_language, "JAVA_8");
    assert_eq!(request.target_language, "JAVA_17");
    assert!(request.source_database.is_none());
}

#[test]
fn plan_lookup_prefers_latest_matching_update() {
    let plan: TransformationPlan = serde_json::from_value(serde_json::json!({
        "transformationSteps": [
            {
                "id": "1",
                "name": "Build",
                "progressUpdates": [
                    {
                        "name": "client build",
                        "status": "AWAITING_CLIENT_ACTION",
                        "downloadArtifacts": [
                            { "downloadArtifactId": "old", "downloadArtifactType": "ClientInstructions" }
                        ]
                    },
                    {
                        "name": "client build",
                        "status": "AWAITING_CLIENT_ACTION",
                        "downloadArtifacts": [
                            { "downloadArtifactId": "new", "downloadArtifactType": "ClientInstructions" }
                        ]
                    },
                    {
                        "name": "table",
                        "status": "COMPLETED",
                        "description": "{\"type\":\"table\",\"name\":\"Dependency changes\",\"columnNames\":[\"dependency\",\"action\"],\"rows\":[{\"dependency\":\"junit\",\"action\":\"Updated\"}]}"
                    }
                ]
            }
        ]
    }))
    .unwrap();

    let artifact = plan
        .find_download_artifact(DownloadArtifactType::ClientInstructions, AWAITING_CLIENT_ACTION)
        .unwrap();
    assert_eq!(artifact.download_artifact_id, "new");
    assert!(
        plan.find_download_artifact(DownloadArtifactType::DependencyResolution, PAUSED_FOR_INPUT)
            .is_none()
    );

    let tables = plan.tables();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "Dependency changes");
    assert_eq!(tables[0].rows[0]["action"], "Updated");
}

#[test]
fn error_display_includes_request_id() {
    let err = RemoteError::new("StartTransformation", "throttled")
        .with_request_id(Some("req-42".to_string()));
    assert_eq!(
        err.to_string(),
        "StartTransformation failed (request id: req-42): throttled"
    );
}
