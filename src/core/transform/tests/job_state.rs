use std::path::PathBuf;

use crate::core::transform::{
    JdkVersion, JobSetup, JobState, JobStateError, JobStatus, RemoteJobStatus,
};

fn configured_job() -> JobState {
    let mut job = JobState::new();
    job.begin(JobSetup::language_upgrade(
        PathBuf::from("/work/orders-service"),
        JdkVersion::Jdk8,
        JdkVersion::Jdk17,
    ));
    job
}

#[test]
fn setup_is_frozen_after_submission() {
    let mut job = configured_job();
    job.setup_mut().unwrap().custom_build_command = Some("clean verify".into());
    job.mark_submitted("job-1".into()).unwrap();

    assert_eq!(
        job.setup_mut().unwrap_err(),
        JobStateError::AlreadySubmitted("job-1".into())
    );
    assert_eq!(
        job.setup().unwrap().custom_build_command.as_deref(),
        Some("clean verify")
    );
    assert_eq!(job.setup().unwrap().project_name, "orders-service");
}

#[test]
fn terminal_status_is_sticky() {
    let mut job = configured_job();
    job.mark_submitted("job-2".into()).unwrap();
    assert!(job.set_status(JobStatus::Transforming));
    assert!(job.set_status(JobStatus::Failed));
    assert!(!job.set_status(JobStatus::Transforming));
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(!job.is_running());
}

#[test]
fn remote_status_changes_are_reported_once() {
    let mut job = configured_job();
    job.mark_submitted("job-3".into()).unwrap();
    assert!(job.observe_remote_status(RemoteJobStatus::Planning));
    assert!(!job.observe_remote_status(RemoteJobStatus::Planning));
    assert_eq!(job.status(), JobStatus::Planning);
    assert!(job.observe_remote_status(RemoteJobStatus::Paused));
    assert_eq!(job.status(), JobStatus::Planning);
    assert!(job.observe_remote_status(RemoteJobStatus::Completed));
    assert_eq!(job.status(), JobStatus::Completed);
}

#[test]
fn build_log_drains_on_read() {
    let mut job = configured_job();
    job.append_build_log("[INFO] BUILD SUCCESS");
    job.append_build_log("done\n");
    assert_eq!(job.take_build_log(), "[INFO] BUILD SUCCESS\ndone\n");
    assert_eq!(job.take_build_log(), "");
}

#[test]
fn begin_discards_the_previous_job() {
    let mut job = configured_job();
    job.mark_submitted("job-4".into()).unwrap();
    job.set_status(JobStatus::Completed);
    job.begin(JobSetup::language_upgrade(
        PathBuf::from("/work/billing"),
        JdkVersion::Jdk11,
        JdkVersion::Jdk17,
    ));
    assert_eq!(job.job_id(), "");
    assert_eq!(job.status(), JobStatus::NotStarted);
    assert!(!job.is_submitted());
}

#[test]
fn class_major_versions_map_to_jdks() {
    assert_eq!(JdkVersion::from_class_major(52), JdkVersion::Jdk8);
    assert_eq!(JdkVersion::from_class_major(55), JdkVersion::Jdk11);
    assert_eq!(JdkVersion::from_class_major(61), JdkVersion::Jdk17);
    assert_eq!(JdkVersion::from_class_major(65), JdkVersion::Unsupported);
    assert_eq!(JdkVersion::from_name("jdk8"), Some(JdkVersion::Jdk8));
    assert_eq!(JdkVersion::from_name("17"), Some(JdkVersion::Jdk17));
}
