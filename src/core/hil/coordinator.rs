use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pom::{VERSION_SENTINEL, replace_dependency_version};
use super::report::{REPORT_FILE_NAME, VersionChoices, parse_dependency_report};
use crate::core::archive::{ZipBuilder, extract_zip};
use crate::core::process::{CommandSpec, ProcessError, ProcessRunner};
use crate::core::remote::{
    ExportContext, RemoteError, RemoteJobClient, ResumeAction, UploadContext,
};
use crate::core::scratch::{ScratchDir, TempResources};

#[derive(Debug, thiserror::Error)]
pub enum HilError {
    #[error("no alternative versions of {artifact} are available")]
    AlternateDependencyVersionsNotFound { artifact: String },
    #[error("the paused job has no dependency to resolve")]
    NoDependencyArtifact,
    #[error("dependency resolution manifest is invalid: {0}")]
    ManifestInvalid(String),
    #[error("could not update the dependency version: {0}")]
    PomRewrite(String),
    #[error("dependency report was not produced at {}", .0.display())]
    ReportMissing(PathBuf),
    #[error("dependency report could not be read: {0}")]
    ReportParse(String),
    #[error("dependency build failed")]
    BuildFailed { log: String },
    #[error("dependency resolution was cancelled")]
    Cancelled,
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("dependency resolution file error: {0}")]
    Io(String),
}

fn io_err(context: &str, e: impl std::fmt::Display) -> HilError {
    HilError::Io(format!("{}: {}", context, e))
}

/// `manifest.json` of a dependency-resolution artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HilManifest {
    pub hil_capability: String,
    pub pom_folder_name: String,
    pub pom_artifact_id: String,
    pub pom_group_id: String,
    pub source_pom_version: String,
}

/// Sets up dependency-resolution sessions for paused jobs.
pub struct HilCoordinator {
    client: RemoteJobClient,
    runner: Arc<dyn ProcessRunner>,
    maven_command: String,
    temp_root: PathBuf,
}

impl HilCoordinator {
    pub fn new(
        client: RemoteJobClient,
        runner: Arc<dyn ProcessRunner>,
        maven_command: &str,
        temp_root: &Path,
    ) -> Self {
        Self {
            client,
            runner,
            maven_command: maven_command.to_string(),
            temp_root: temp_root.to_path_buf(),
        }
    }

    /// Download the artifact, stage the pom copies, and list newer versions of the
    /// flagged dependency. Scratch directories live as long as the returned session.
    pub async fn prepare(
        self,
        job_id: &str,
        artifact_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HilSession, HilError> {
        let mut resources = TempResources::new();
        let scratch = |prefix: &str| {
            ScratchDir::create(&self.temp_root, prefix, job_id)
                .map_err(|e| io_err("creating scratch directory", e))
        };
        let downloads = resources.track_dir(scratch("q-hil-downloads")?);
        let dependency_list = resources.track_dir(scratch("q-hil-dependency-list")?);
        let user_update = resources.track_dir(scratch("q-hil-user-update")?);

        let context = ExportContext::DependencyResolution {
            artifact_id: artifact_id.to_string(),
        };
        let archive = self
            .client
            .export_result_archive(job_id, &context, &downloads)
            .await?;
        let unpacked = downloads.join("artifact");
        extract_zip(&archive, &unpacked).map_err(|e| io_err("unpacking artifact", format!("{:#}", e)))?;

        let manifest_text = std::fs::read_to_string(unpacked.join("manifest.json"))
            .map_err(|e| HilError::ManifestInvalid(e.to_string()))?;
        let manifest: HilManifest = serde_json::from_str(&manifest_text)
            .map_err(|e| HilError::ManifestInvalid(e.to_string()))?;
        info!(
            "Job {} needs a version of {}:{} (currently {})",
            job_id, manifest.pom_group_id, manifest.pom_artifact_id, manifest.source_pom_version
        );

        let pom = std::fs::read_to_string(unpacked.join(&manifest.pom_folder_name).join("pom.xml"))
            .map_err(|e| HilError::ManifestInvalid(format!("pom.xml: {}", e)))?;
        std::fs::write(dependency_list.join("pom.xml"), &pom)
            .map_err(|e| io_err("staging pom", e))?;
        let placeholder = replace_dependency_version(
            &pom,
            &manifest.pom_artifact_id,
            &manifest.source_pom_version,
            VERSION_SENTINEL,
        )?;
        std::fs::write(user_update.join("pom.xml"), placeholder)
            .map_err(|e| io_err("staging pom", e))?;

        if cancel.is_cancelled() {
            return Err(HilError::Cancelled);
        }
        let report = CommandSpec::new(&self.maven_command, &dependency_list).args([
            "versions:dependency-updates-aggregate-report",
            "-DonlyProjectDependencies=true",
            "-DdependencyUpdatesReportFormats=xml",
        ]);
        info!("Listing dependency versions: {}", report.display());
        let output = self.runner.run(&report, cancel).await?;
        if !output.success() {
            return Err(HilError::BuildFailed {
                log: output.combined(),
            });
        }
        if cancel.is_cancelled() {
            return Err(HilError::Cancelled);
        }

        let report_path = dependency_list.join("target").join(REPORT_FILE_NAME);
        let xml = std::fs::read_to_string(&report_path)
            .map_err(|_| HilError::ReportMissing(report_path.clone()))?;
        let updates = parse_dependency_report(&xml)?;
        let choices = updates
            .iter()
            .find(|u| u.artifact_id == manifest.pom_artifact_id)
            .map(VersionChoices::from_updates)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| HilError::AlternateDependencyVersionsNotFound {
                artifact: format!("{}:{}", manifest.pom_group_id, manifest.pom_artifact_id),
            })?;
        info!("{} candidate versions found", choices.all.len());

        Ok(HilSession {
            job_id: job_id.to_string(),
            manifest,
            choices,
            client: self.client,
            runner: self.runner,
            maven_command: self.maven_command,
            user_update,
            resources,
        })
    }
}

/// A prepared dependency pause waiting for the user's version choice.
pub struct HilSession {
    job_id: String,
    manifest: HilManifest,
    choices: VersionChoices,
    client: RemoteJobClient,
    runner: Arc<dyn ProcessRunner>,
    maven_command: String,
    user_update: PathBuf,
    resources: TempResources,
}

impl std::fmt::Debug for HilSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HilSession")
            .field("job_id", &self.job_id)
            .field("manifest", &self.manifest)
            .field("choices", &self.choices)
            .finish_non_exhaustive()
    }
}

impl HilSession {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn manifest(&self) -> &HilManifest {
        &self.manifest
    }

    pub fn choices(&self) -> &VersionChoices {
        &self.choices
    }

    /// Pin `version`, upload the resolved dependencies, and resume the job.
    pub async fn submit(mut self, version: &str, cancel: &CancellationToken) -> Result<(), HilError> {
        let result = self.upload_choice(version, cancel).await;
        self.release();
        result
    }

    /// Abandon the session; scratch space is removed.
    pub fn cancel(mut self) {
        info!("Dependency resolution for {} cancelled", self.job_id);
        self.release();
    }

    fn release(&mut self) {
        let failures = self.resources.release_all();
        if failures > 0 {
            warn!("{} dependency-resolution temp resources were left behind", failures);
        }
    }

    async fn upload_choice(&self, version: &str, cancel: &CancellationToken) -> Result<(), HilError> {
        let version = version.trim();
        if version.is_empty() {
            return Err(HilError::PomRewrite("no version selected".to_string()));
        }
        if !self.choices.all.iter().any(|v| v == version) {
            warn!("{} is not one of the offered versions; using it anyway", version);
        }

        let pom_path = self.user_update.join("pom.xml");
        let pom = std::fs::read_to_string(&pom_path).map_err(|e| io_err("reading pom", e))?;
        if !pom.contains(VERSION_SENTINEL) {
            return Err(HilError::PomRewrite("version placeholder missing".to_string()));
        }
        std::fs::write(&pom_path, pom.replacen(VERSION_SENTINEL, version, 1))
            .map_err(|e| io_err("writing pom", e))?;

        if cancel.is_cancelled() {
            return Err(HilError::Cancelled);
        }
        let deps_dir = self.user_update.join("dependencies");
        let copy = CommandSpec::new(&self.maven_command, &self.user_update).args([
            "dependency:copy-dependencies".to_string(),
            format!("-DoutputDirectory={}", deps_dir.display()),
            "-Dmdep.useRepositoryLayout=true".to_string(),
            "-Dmdep.copyPom=true".to_string(),
            "-Dmdep.addParentPoms=true".to_string(),
        ]);
        info!("Fetching {} {}: {}", self.manifest.pom_artifact_id, version, copy.display());
        let output = self.runner.run(&copy, cancel).await?;
        if !output.success() {
            return Err(HilError::BuildFailed {
                log: output.combined(),
            });
        }

        let zip_path = self.user_update.join("dependency-resolution.zip");
        let packaged = (|| -> anyhow::Result<()> {
            let mut zip = ZipBuilder::create(&zip_path)?;
            zip.add_bytes("manifest.json", &serde_json::to_vec_pretty(&self.manifest)?)?;
            zip.add_file("pom.xml", &pom_path)?;
            if deps_dir.is_dir() {
                zip.add_dir("dependencies", &deps_dir, &[])?;
            }
            zip.finish()?;
            Ok(())
        })();
        packaged.map_err(|e| io_err("packaging dependencies", format!("{:#}", e)))?;

        let upload = UploadContext::DependencyResolution {
            job_id: self.job_id.clone(),
        };
        self.client.upload_file(&zip_path, &upload).await?;
        self.client
            .resume_job(&self.job_id, ResumeAction::Completed)
            .await?;
        info!("Job {} resumed with {} {}", self.job_id, self.manifest.pom_artifact_id, version);
        Ok(())
    }
}
