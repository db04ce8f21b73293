use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::archive::extract_zip;
use crate::core::diff::{DiffError, ReviewPatch, read_patch_manifest};
use crate::core::remote::{ExportContext, RemoteError, RemoteJobClient};
use crate::core::scratch::remove_path_logged;

#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("result archive could not be unpacked: {0}")]
    Archive(String),
}

/// An unpacked result archive inside the job's artifact directory.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub job_dir: PathBuf,
    /// Patches to review, in order.
    pub patches: Vec<ReviewPatch>,
    /// First patch, copied to `<job_dir>/diff.patch`.
    pub diff_patch: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    /// Why the patch set could not be read. The rest of the download is still usable.
    pub patch_error: Option<DiffError>,
}

impl JobArtifacts {
    pub fn has_multiple_diffs(&self) -> bool {
        self.patches.len() > 1
    }
}

/// Export the job's result archive into `job_dir` and locate its patches and summary.
pub async fn download_results(
    client: &RemoteJobClient,
    job_id: &str,
    job_dir: &Path,
) -> Result<JobArtifacts, ResultError> {
    let archive = client
        .export_result_archive(job_id, &ExportContext::ResultArchive, job_dir)
        .await?;
    extract_zip(&archive, job_dir).map_err(|e| ResultError::Archive(format!("{:#}", e)))?;
    remove_path_logged(&archive);

    let summary = Some(job_dir.join("summary").join("summary.md")).filter(|p| p.is_file());
    let (patches, diff_patch, patch_error) = match locate_patches(job_dir) {
        Ok((patches, diff_patch)) => (patches, diff_patch, None),
        Err(e) => {
            warn!("Patches of {} cannot be reviewed: {}", job_id, e);
            (Vec::new(), None, Some(e))
        }
    };

    info!(
        "Results for {}: {} patch(es), summary {}",
        job_id,
        patches.len(),
        if summary.is_some() { "present" } else { "missing" }
    );
    Ok(JobArtifacts {
        job_dir: job_dir.to_path_buf(),
        patches,
        diff_patch,
        summary,
        patch_error,
    })
}

/// The patches to review, plus the first one copied to `<job_dir>/diff.patch`.
fn locate_patches(job_dir: &Path) -> Result<(Vec<ReviewPatch>, Option<PathBuf>), DiffError> {
    let patches = read_patch_manifest(&job_dir.join("patch"))?;
    let diff_patch = match patches.first() {
        Some(first) => {
            let dest = job_dir.join("diff.patch");
            std::fs::copy(&first.path, &dest)
                .map_err(|e| DiffError::io("copying diff.patch", e))?;
            Some(dest)
        }
        None => None,
    };
    Ok((patches, diff_patch))
}
