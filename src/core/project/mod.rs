//! Workspace scanning: which open folders can be transformed, and from which JDK.

pub mod sql;

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::process::{CommandSpec, ProcessRunner};
use crate::core::transform::{JdkVersion, project_name_of};
use crate::platform::{NativePlatform, Platform};

/// Directories never worth descending into while scanning a workspace.
pub const IGNORED_DIRS: &[&str] = &[".git", ".idea", ".vscode", "node_modules", ".gradle"];

pub const BUILD_FILE: &str = "pom.xml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCandidate {
    pub name: String,
    pub path: PathBuf,
    pub detected_jdk: Option<JdkVersion>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("no workspace folders are open")]
    NoOpenProjects,
    #[error("no open folder contains Java source files")]
    NoJavaProjectsFound,
    #[error("no Java project contains a {BUILD_FILE}")]
    NoBuildFileFound,
    #[error("source version {0} is not supported")]
    UnsupportedSourceJdk(String),
    #[error("target version {0} is not supported")]
    UnsupportedTargetJdk(String),
    #[error("SQL conversion metadata file not found: {0}")]
    NoSqlMetadata(String),
    #[error("invalid SQL conversion metadata: {0}")]
    InvalidSqlMetadata(String),
    #[error("invalid custom dependency versions file: {0}")]
    InvalidDependencyFile(String),
}

/// Scan the open folders for transformable projects, keeping folder order.
///
/// Only the three "nothing usable at all" conditions are errors; JDK detection
/// failures for individual candidates just leave the version unknown.
pub async fn validate_open_projects(
    folders: &[PathBuf],
    runner: &dyn ProcessRunner,
    java_home: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<Vec<ProjectCandidate>, SetupError> {
    if folders.is_empty() {
        return Err(SetupError::NoOpenProjects);
    }

    let mut java_projects = Vec::new();
    for folder in folders {
        if find_file_blocking(folder, is_java_source).await.is_some() {
            java_projects.push(folder);
        }
    }
    if java_projects.is_empty() {
        return Err(SetupError::NoJavaProjectsFound);
    }

    let mut buildable = Vec::new();
    for folder in java_projects {
        if find_file_blocking(folder, is_build_file).await.is_some() {
            buildable.push(folder);
        }
    }
    if buildable.is_empty() {
        return Err(SetupError::NoBuildFileFound);
    }

    let mut candidates = Vec::with_capacity(buildable.len());
    for folder in buildable {
        let detected_jdk = detect_jdk_version(folder, runner, java_home, cancel).await;
        info!(
            "Transformable project {} (jdk: {})",
            folder.display(),
            detected_jdk.map(|j| j.as_str()).unwrap_or("unknown")
        );
        candidates.push(ProjectCandidate {
            name: project_name_of(folder),
            path: folder.clone(),
            detected_jdk,
        });
    }
    Ok(candidates)
}

/// Best-effort JDK detection from the first compiled class found under `project`.
pub async fn detect_jdk_version(
    project: &Path,
    runner: &dyn ProcessRunner,
    java_home: Option<&Path>,
    cancel: &CancellationToken,
) -> Option<JdkVersion> {
    let class_file = find_file_blocking(project, is_class_file).await?;

    let javap = NativePlatform::javap_executable(java_home);
    let spec = CommandSpec::new(javap.to_string_lossy(), project)
        .arg("-v")
        .arg(class_file.to_string_lossy());
    match runner.run(&spec, cancel).await {
        Ok(out) if out.success() => {
            if let Some(major) = parse_javap_major(&out.stdout) {
                return Some(JdkVersion::from_class_major(major));
            }
            debug!("javap output had no major version for {}", class_file.display());
        }
        Ok(out) => debug!("javap exited with {:?}", out.exit_code),
        Err(e) => debug!("javap unavailable: {}", e),
    }

    match read_class_major(&class_file) {
        Ok(major) => Some(JdkVersion::from_class_major(major)),
        Err(e) => {
            warn!("Could not read class version from {}: {}", class_file.display(), e);
            None
        }
    }
}

pub(crate) fn parse_javap_major(output: &str) -> Option<u16> {
    let re = Regex::new(r"major version:\s*(\d+)").ok()?;
    re.captures(output)?.get(1)?.as_str().parse().ok()
}

/// Read the major version straight out of a class file header.
pub(crate) fn read_class_major(path: &Path) -> std::io::Result<u16> {
    use std::io::Read;
    let mut header = [0u8; 8];
    std::fs::File::open(path)?.read_exact(&mut header)?;
    if header[..4] != [0xCA, 0xFE, 0xBA, 0xBE] {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "missing class file magic",
        ));
    }
    Ok(u16::from_be_bytes([header[6], header[7]]))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn is_java_source(path: &Path) -> bool {
    has_extension(path, "java")
}

fn is_class_file(path: &Path) -> bool {
    has_extension(path, "class")
}

fn is_build_file(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == BUILD_FILE)
}

/// [find_file] on the blocking pool.
async fn find_file_blocking(dir: &Path, pred: fn(&Path) -> bool) -> Option<PathBuf> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || find_file(&dir, &pred))
        .await
        .unwrap_or_else(|e| {
            warn!("Workspace scan task failed: {}", e);
            None
        })
}

/// Depth-first search for the first file matching `pred`, in sorted order.
pub(crate) fn find_file(dir: &Path, pred: &dyn Fn(&Path) -> bool) -> Option<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(dir).ok()?.flatten().collect();
    entries.sort_by_key(|e| e.file_name());
    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() && pred(&path) {
            return Some(path);
        }
        if file_type.is_dir() {
            let name = entry.file_name();
            if !IGNORED_DIRS.iter().any(|d| name == std::ffi::OsStr::new(d)) {
                subdirs.push(path);
            }
        }
    }
    subdirs.into_iter().find_map(|d| find_file(&d, pred))
}
