use std::cmp::Ordering;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::core::process::ProcessOutput;
use crate::core::remote::{
    ExportContext, RemoteJobClient, ResumeAction, RetryPolicy, UploadContext,
};
use crate::core::testing::{FakeApi, FakeRunner, FakeTransport, ok_output, zip_bytes};

const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<DependencyUpdatesReport>
  <summary><usingLastVersion>0</usingLastVersion></summary>
  <dependencies>
    <dependency>
      <groupId>org.other</groupId>
      <artifactId>unrelated</artifactId>
      <currentVersion>1.0</currentVersion>
      <lastVersion>9.9</lastVersion>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>legacy-lib</artifactId>
      <currentVersion>1.2.0</currentVersion>
      <lastVersion>3.1.0</lastVersion>
      <incrementals><incremental>1.2.4</incremental></incrementals>
      <minors><minor>1.9.0</minor><minor>1.10.2</minor></minors>
      <majors><major>2.0.0</major><major>3.1.0</major></majors>
      <status>major available</status>
    </dependency>
  </dependencies>
</DependencyUpdatesReport>
"#;

const EMPTY_REPORT: &str = r#"<DependencyUpdatesReport><dependencies>
  <dependency><groupId>com.example</groupId><artifactId>legacy-lib</artifactId>
  <currentVersion>1.2.0</currentVersion><status>no new available</status></dependency>
</dependencies></DependencyUpdatesReport>"#;

const POM: &str = "<project>
  <artifactId>hil-fixture</artifactId>
  <version>0.0.1</version>
  <dependencies>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>legacy-lib</artifactId>
      <version>1.2.0</version>
    </dependency>
  </dependencies>
</project>";

#[test]
fn report_yields_sorted_choices_for_the_flagged_artifact() {
    let updates = parse_dependency_report(REPORT).unwrap();
    assert_eq!(updates.len(), 2);
    let lib = updates
        .iter()
        .find(|u| u.artifact_id == "legacy-lib")
        .unwrap();
    assert_eq!(lib.current_version.as_deref(), Some("1.2.0"));

    let choices = VersionChoices::from_updates(lib);
    assert_eq!(choices.latest.as_deref(), Some("3.1.0"));
    assert_eq!(choices.highest_major.as_deref(), Some("3.1.0"));
    assert_eq!(choices.highest_minor.as_deref(), Some("1.10.2"));
    assert_eq!(
        choices.all,
        vec!["3.1.0", "2.0.0", "1.10.2", "1.9.0", "1.2.4"]
    );
    assert_eq!(choices.menu()[..2], ["3.1.0".to_string(), "1.10.2".to_string()]);
}

#[test]
fn versions_compare_numerically() {
    assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
    assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
    assert_eq!(compare_versions("1.0", "1.0-beta"), Ordering::Greater);
    assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
}

#[test]
fn pom_version_is_replaced_inside_the_matching_dependency() {
    let out = replace_dependency_version(POM, "legacy-lib", "1.2.0", VERSION_SENTINEL).unwrap();
    assert!(out.contains("<version>*****</version>"));
    // The project's own version is untouched.
    assert!(out.contains("<version>0.0.1</version>"));

    let err = replace_dependency_version(POM, "missing", "7.7", "1.0").unwrap_err();
    assert!(matches!(err, HilError::PomRewrite(_)));
}

struct Harness {
    _dir: tempfile::TempDir,
    temp: std::path::PathBuf,
    api: Arc<FakeApi>,
    client: RemoteJobClient,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let temp = dir.path().join("tmp");
    std::fs::create_dir_all(&temp).unwrap();
    let api = Arc::new(FakeApi::new(vec![]));
    let manifest = br#"{"hilCapability":"HIL_1pDependency_VersionUpgrade","pomFolderName":"pomFolder","pomArtifactId":"legacy-lib","pomGroupId":"com.example","sourcePomVersion":"1.2.0"}"#;
    api.set_export(
        &ExportContext::DependencyResolution {
            artifact_id: "hil-1".to_string(),
        },
        zip_bytes(&[
            ("manifest.json", manifest),
            ("pomFolder/pom.xml", POM.as_bytes()),
        ]),
    );
    let client = RemoteJobClient::new(
        api.clone(),
        Arc::new(FakeTransport::new(&[])),
        RetryPolicy::default(),
    );
    Harness {
        _dir: dir,
        temp,
        api,
        client,
    }
}

/// Writes `report` where the versions plugin would, and fakes the dependency copy.
fn maven(report: &'static str, seen_pom: Arc<Mutex<String>>) -> FakeRunner {
    FakeRunner::new(move |spec| {
        if spec.args[0] == "versions:dependency-updates-aggregate-report" {
            let target = spec.cwd.join("target");
            std::fs::create_dir_all(&target).unwrap();
            std::fs::write(target.join(REPORT_FILE_NAME), report).unwrap();
        } else {
            *seen_pom.lock().unwrap() = std::fs::read_to_string(spec.cwd.join("pom.xml")).unwrap();
            let out = spec.args[1].trim_start_matches("-DoutputDirectory=");
            let jar = Path::new(out).join("com/example/legacy-lib/3.1.0/legacy-lib-3.1.0.jar");
            std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
            std::fs::write(jar, b"jar").unwrap();
        }
        Ok(ok_output(""))
    })
}

fn coordinator(h: &Harness, runner: FakeRunner) -> HilCoordinator {
    HilCoordinator::new(h.client.clone(), Arc::new(runner), "mvn", &h.temp)
}

fn temp_is_empty(temp: &Path) -> bool {
    std::fs::read_dir(temp).unwrap().count() == 0
}

#[tokio::test]
async fn selected_version_is_uploaded_and_job_resumed() {
    let h = harness();
    let seen_pom = Arc::new(Mutex::new(String::new()));
    let session = coordinator(&h, maven(REPORT, seen_pom.clone()))
        .prepare("job-1", "hil-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(session.manifest().pom_artifact_id, "legacy-lib");
    assert_eq!(session.choices().highest_major.as_deref(), Some("3.1.0"));
    assert_eq!(std::fs::read_dir(&h.temp).unwrap().count(), 3);

    session
        .submit("3.1.0", &CancellationToken::new())
        .await
        .unwrap();

    assert!(seen_pom.lock().unwrap().contains("<version>3.1.0</version>"));
    assert_eq!(
        h.api.uploads(),
        vec![UploadContext::DependencyResolution {
            job_id: "job-1".to_string()
        }]
    );
    assert_eq!(
        h.api.resumes(),
        vec![("job-1".to_string(), ResumeAction::Completed)]
    );
    assert!(temp_is_empty(&h.temp));
}

#[tokio::test]
async fn no_alternative_versions_is_a_distinct_error_and_cleans_up() {
    let h = harness();
    let err = coordinator(&h, maven(EMPTY_REPORT, Arc::new(Mutex::new(String::new()))))
        .prepare("job-1", "hil-1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HilError::AlternateDependencyVersionsNotFound { ref artifact } if artifact == "com.example:legacy-lib"
    ));
    assert!(h.api.resumes().is_empty());
    assert!(temp_is_empty(&h.temp));
}

#[tokio::test]
async fn cancelling_the_session_removes_scratch_space() {
    let h = harness();
    let session = coordinator(&h, maven(REPORT, Arc::new(Mutex::new(String::new()))))
        .prepare("job-1", "hil-1", &CancellationToken::new())
        .await
        .unwrap();
    session.cancel();

    assert!(temp_is_empty(&h.temp));
    assert!(h.api.uploads().is_empty());
}

#[tokio::test]
async fn failed_report_build_surfaces_the_log() {
    let h = harness();
    let runner = FakeRunner::new(|_| {
        Ok(ProcessOutput {
            exit_code: Some(1),
            stdout: "[ERROR] Could not resolve plugin".to_string(),
            stderr: String::new(),
        })
    });
    let err = coordinator(&h, runner)
        .prepare("job-1", "hil-1", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        HilError::BuildFailed { log } => assert!(log.contains("Could not resolve plugin")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(temp_is_empty(&h.temp));
}
