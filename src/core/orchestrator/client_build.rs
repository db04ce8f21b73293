use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::archive::{ZipBuilder, extract_zip, list_files};
use crate::core::build::{SOURCE_SKIP_DIRS, build_command};
use crate::core::diff::DiffModel;
use crate::core::process::ProcessRunner;
use crate::core::remote::{ExportContext, RemoteJobClient, ResumeAction, UploadContext};
use crate::core::scratch::{ScratchDir, TempResources, copy_tree};
use crate::core::transform::{JobSetup, SharedJobState};
use crate::platform::maven_for_project;

const BUILD_LOG_NAME: &str = "build-output.log";

/// What a mid-poll local build needs besides the remote client.
#[derive(Clone)]
pub struct ClientBuildContext {
    pub runner: Arc<dyn ProcessRunner>,
    pub maven_command: String,
    pub temp_root: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildResultManifest<'a> {
    capability: &'a str,
    exit_code: i32,
    command_log_file_name: &'a str,
}

/// Apply the server's instruction patch to a copy of the project, build it, upload the
/// result, and resume the job. Scratch space is removed whatever happens.
pub async fn run_client_build(
    client: &RemoteJobClient,
    job: &SharedJobState,
    artifact_id: &str,
    ctx: &ClientBuildContext,
    cancel: &CancellationToken,
) -> Result<()> {
    let (job_id, setup) = {
        let state = job.lock().await;
        let setup = state
            .setup()
            .cloned()
            .ok_or_else(|| anyhow!("no job configured"))?;
        (state.job_id().to_string(), setup)
    };
    info!("Running client-side build {} for job {}", artifact_id, job_id);

    let mut resources = TempResources::new();
    let result = build_and_report(
        client,
        job,
        &job_id,
        &setup,
        artifact_id,
        ctx,
        cancel,
        &mut resources,
    )
    .await;
    let failures = resources.release_all();
    if failures > 0 {
        warn!("{} client-build scratch resources were left behind", failures);
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn build_and_report(
    client: &RemoteJobClient,
    job: &SharedJobState,
    job_id: &str,
    setup: &JobSetup,
    artifact_id: &str,
    ctx: &ClientBuildContext,
    cancel: &CancellationToken,
    resources: &mut TempResources,
) -> Result<()> {
    let downloads = resources.track_dir(ScratchDir::create(
        &ctx.temp_root,
        "q-client-build-downloads",
        job_id,
    )?);
    let copy = resources.track_dir(ScratchDir::create(
        &ctx.temp_root,
        "q-client-build-project",
        job_id,
    )?);

    let context = ExportContext::ClientInstructions {
        artifact_id: artifact_id.to_string(),
    };
    let archive = client
        .export_result_archive(job_id, &context, &downloads)
        .await?;
    let instructions = downloads.join("instructions");
    extract_zip(&archive, &instructions)?;
    let patch = find_patch(&instructions)?;

    copy_tree(&setup.project_path, &copy, SOURCE_SKIP_DIRS)
        .with_context(|| format!("Failed to copy {}", setup.project_path.display()))?;
    DiffModel::new().parse_diff(&patch, &copy, &ctx.temp_root, true, "client-build")?;

    if cancel.is_cancelled() {
        bail!("client-side build cancelled before it started");
    }
    let maven = maven_for_project(&copy, &ctx.maven_command);
    let command = build_command(setup, &maven, &copy);
    info!("Client-side build: {}", command.display());
    let output = ctx.runner.run(&command, cancel).await?;
    let log = output.combined();
    job.lock().await.append_build_log(&log);
    if cancel.is_cancelled() {
        bail!("client-side build cancelled");
    }
    let exit_code = output.exit_code.unwrap_or(-1);
    info!("Client-side build exited with {}", exit_code);

    let result_zip = downloads.join("build-result.zip");
    let mut zip = ZipBuilder::create(&result_zip)?;
    let manifest = BuildResultManifest {
        capability: "CLIENT_SIDE_BUILD",
        exit_code,
        command_log_file_name: BUILD_LOG_NAME,
    };
    zip.add_bytes("manifest.json", &serde_json::to_vec_pretty(&manifest)?)?;
    zip.add_bytes(BUILD_LOG_NAME, log.as_bytes())?;
    zip.finish()?;

    let upload = UploadContext::ClientBuildResult {
        job_id: job_id.to_string(),
        artifact_id: artifact_id.to_string(),
    };
    client.upload_file(&result_zip, &upload).await?;
    client.resume_job(job_id, ResumeAction::Completed).await?;
    Ok(())
}

fn find_patch(dir: &Path) -> Result<PathBuf> {
    list_files(dir, &[])?
        .into_iter()
        .find(|p| p.extension().is_some_and(|e| e == "patch"))
        .ok_or_else(|| anyhow!("client instructions contain no patch"))
}
