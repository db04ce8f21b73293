//! Local pre-build and packaging of the project upload.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::archive::ZipBuilder;
use crate::core::process::{CommandSpec, ProcessError, ProcessRunner};
use crate::core::project::SetupError;
use crate::core::scratch::ScratchDir;
use crate::core::transform::{JobSetup, TransformationType};
use crate::platform::maven_for_project;

/// Never shipped as source: build output and editor/VCS state.
pub const SOURCE_SKIP_DIRS: &[&str] = &[
    "target",
    ".git",
    ".idea",
    ".vscode",
    "node_modules",
    ".gradle",
];

pub const DEFAULT_BUILD_GOALS: &[&str] = &["clean", "install"];
pub const CUSTOM_VERSIONS_ENTRY: &str = "custom-upgrades/dependency-versions.yaml";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("copying project dependencies failed")]
    DependencyCopyFailed { log: String },
    #[error("the project did not build")]
    CompileFailed { log: String },
    #[error("the selected JDK cannot build this project")]
    JavaHomeMismatch { log: String },
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("packaging the project failed: {0}")]
    Packaging(String),
}

impl BuildError {
    pub fn log(&self) -> Option<&str> {
        match self {
            BuildError::DependencyCopyFailed { log }
            | BuildError::CompileFailed { log }
            | BuildError::JavaHomeMismatch { log } => Some(log),
            _ => None,
        }
    }
}

/// Upload-ready zip plus the log of the build that produced it.
/// The zip lives in a scratch directory removed when this is dropped.
#[derive(Debug)]
pub struct CodePackage {
    pub zip_path: PathBuf,
    pub build_log: String,
    _workdir: ScratchDir,
}

impl CodePackage {
    /// Keep a copy of the uploaded zip, e.g. in the job's artifact directory.
    pub fn keep_copy(&self, dest: &Path) -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&self.zip_path, dest).map(|_| ())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadManifest {
    version: &'static str,
    sources_root: &'static str,
    dependencies_root: &'static str,
    hil_capabilities: Vec<&'static str>,
    transform_capabilities: Vec<&'static str>,
    custom_build_command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested_conversions: Option<RequestedConversions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestedConversions {
    sql_conversion: SqlConversionRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SqlConversionRequest {
    source: String,
    target: String,
    schema: String,
    host: String,
    sct_file_name: String,
}

pub struct BuildContext<'a> {
    pub runner: &'a dyn ProcessRunner,
    /// Maven command used when the project has no wrapper.
    pub maven_command: &'a str,
    pub temp_root: &'a Path,
}

/// Build (for language upgrades) and zip the project described by `setup`.
pub async fn prepare_code_package(
    setup: &JobSetup,
    ctx: &BuildContext<'_>,
    cancel: &CancellationToken,
) -> Result<CodePackage, BuildError> {
    if let Some(file) = &setup.custom_dependency_file {
        validate_dependency_file(file)?;
    }
    let workdir = ScratchDir::create(ctx.temp_root, "q-transform", &setup.project_name)
        .map_err(|e| BuildError::Packaging(e.to_string()))?;

    let mut build_log = String::new();
    if setup.transformation_type == TransformationType::LanguageUpgrade {
        build_log = run_local_build(setup, ctx, &workdir.join("dependencies"), cancel).await?;
    }

    let zip_path = workdir.join("transformation-source.zip");
    package(setup, &workdir.join("dependencies"), &zip_path)
        .map_err(|e| BuildError::Packaging(format!("{:#}", e)))?;
    info!("Packaged {} into {}", setup.project_name, zip_path.display());

    Ok(CodePackage {
        zip_path,
        build_log,
        _workdir: workdir,
    })
}

fn java_env(spec: CommandSpec, setup: &JobSetup) -> CommandSpec {
    match &setup.java_home {
        Some(home) => spec.env("JAVA_HOME", home.to_string_lossy()),
        None => spec,
    }
}

fn build_goals(setup: &JobSetup) -> Vec<String> {
    match setup.custom_build_command.as_deref().map(str::trim) {
        Some(custom) if !custom.is_empty() => {
            custom.split_whitespace().map(str::to_string).collect()
        }
        _ => DEFAULT_BUILD_GOALS.iter().map(|s| s.to_string()).collect(),
    }
}

/// The project build: the job's goals, quiet, under the job's JDK, run in `cwd`.
pub(crate) fn build_command(setup: &JobSetup, maven: &str, cwd: &Path) -> CommandSpec {
    java_env(
        CommandSpec::new(maven, cwd).args(build_goals(setup)).arg("-q"),
        setup,
    )
}

async fn run_local_build(
    setup: &JobSetup,
    ctx: &BuildContext<'_>,
    deps_dir: &Path,
    cancel: &CancellationToken,
) -> Result<String, BuildError> {
    let maven = maven_for_project(&setup.project_path, ctx.maven_command);
    let mut log = String::new();

    let copy = java_env(
        CommandSpec::new(&maven, &setup.project_path).args([
            "dependency:copy-dependencies".to_string(),
            format!("-DoutputDirectory={}", deps_dir.display()),
            "-Dmdep.useRepositoryLayout=true".to_string(),
            "-Dmdep.copyPom=true".to_string(),
            "-Dmdep.addParentPoms=true".to_string(),
            "-q".to_string(),
        ]),
        setup,
    );
    info!("Copying dependencies: {}", copy.display());
    let out = ctx.runner.run(&copy, cancel).await?;
    log.push_str(&out.combined());
    if !out.success() {
        warn!("Dependency copy exited with {:?}", out.exit_code);
        return Err(if is_java_home_mismatch(&log) {
            BuildError::JavaHomeMismatch { log }
        } else {
            BuildError::DependencyCopyFailed { log }
        });
    }
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled { program: maven }.into());
    }

    let build = build_command(setup, &maven, &setup.project_path);
    info!("Building project: {}", build.display());
    let out = ctx.runner.run(&build, cancel).await?;
    log.push_str(&out.combined());
    if !out.success() {
        warn!("Build exited with {:?}", out.exit_code);
        return Err(if is_java_home_mismatch(&log) {
            BuildError::JavaHomeMismatch { log }
        } else {
            BuildError::CompileFailed { log }
        });
    }
    Ok(log)
}

/// Build output that means the JDK in use is the wrong one, not that the code is broken.
pub fn is_java_home_mismatch(log: &str) -> bool {
    Regex::new(
        r"(?i)(invalid (target|source) release|release version \d+ not supported|unsupported class file major version|compiled by a more recent version of the Java Runtime|JAVA_HOME environment variable is not defined correctly)",
    )
    .map(|re| re.is_match(log))
    .unwrap_or(false)
}

fn package(setup: &JobSetup, deps_dir: &Path, zip_path: &Path) -> anyhow::Result<()> {
    let mut zip = ZipBuilder::create(zip_path)?;
    zip.add_dir("sourceCode", &setup.project_path, SOURCE_SKIP_DIRS)?;
    if deps_dir.is_dir() {
        zip.add_dir("dependencies", deps_dir, &[])?;
    }
    if let Some(file) = &setup.custom_dependency_file {
        zip.add_file(CUSTOM_VERSIONS_ENTRY, file)?;
    }

    let mut requested_conversions = None;
    if let Some(db) = &setup.database {
        let sct_name = db
            .metadata_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "metadata.sct".to_string());
        zip.add_file(&format!("sct/{}", sct_name), &db.metadata_file)?;
        requested_conversions = Some(RequestedConversions {
            sql_conversion: SqlConversionRequest {
                source: db.source_vendor.to_ascii_uppercase(),
                target: db.target_vendor.to_ascii_uppercase(),
                schema: db.schema.clone(),
                host: db.server_name.clone(),
                sct_file_name: sct_name,
            },
        });
    }

    let manifest = UploadManifest {
        version: "1.0",
        sources_root: "sourceCode/",
        dependencies_root: "dependencies/",
        hil_capabilities: vec!["HIL_1pDependency_VersionUpgrade"],
        transform_capabilities: vec![
            "EXPLAINABILITY_V1",
            "SELECTIVE_TRANSFORMATION_V2",
            "CLIENT_SIDE_BUILD",
        ],
        custom_build_command: build_goals(setup).join(" "),
        requested_conversions,
    };
    zip.add_bytes("manifest.json", &serde_json::to_vec_pretty(&manifest)?)?;
    zip.finish()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomVersions {
    dependency_management: DependencyManagement,
}

#[derive(Debug, Deserialize)]
struct DependencyManagement {
    #[serde(default)]
    dependencies: Vec<VersionOverride>,
    #[serde(default)]
    plugins: Vec<VersionOverride>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionOverride {
    identifier: String,
    target_version: String,
}

/// Check a custom dependency-versions YAML before it is shipped with the upload.
pub fn validate_dependency_file(path: &Path) -> Result<(), SetupError> {
    let invalid = |msg: String| SetupError::InvalidDependencyFile(msg);
    let text = std::fs::read_to_string(path)
        .map_err(|e| invalid(format!("{}: {}", path.display(), e)))?;
    let parsed: CustomVersions =
        serde_yaml::from_str(&text).map_err(|e| invalid(e.to_string()))?;
    let overrides = parsed
        .dependency_management
        .dependencies
        .iter()
        .chain(parsed.dependency_management.plugins.iter());
    let mut count = 0;
    for entry in overrides {
        if !entry.identifier.contains(':') {
            return Err(invalid(format!(
                "identifier '{}' is not groupId:artifactId",
                entry.identifier
            )));
        }
        if entry.target_version.trim().is_empty() {
            return Err(invalid(format!("{} has no targetVersion", entry.identifier)));
        }
        count += 1;
    }
    if count == 0 {
        return Err(invalid("no dependencies or plugins listed".to_string()));
    }
    Ok(())
}
