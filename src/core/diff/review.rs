use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use super::{DiffError, DiffModel, PatchFileNode, SaveReport};

/// One entry of `patch/diff.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDescriptor {
    pub name: String,
    pub file_name: String,
    #[serde(default = "default_successful")]
    pub is_successful: bool,
}

fn default_successful() -> bool {
    true
}

#[derive(Deserialize)]
struct PatchManifest {
    content: Vec<PatchDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewPatch {
    pub descriptor: PatchDescriptor,
    pub path: PathBuf,
}

/// Patches in `patch_dir`, in review order. `diff.json` lists several; otherwise
/// a lone `diff.patch` is used.
pub fn read_patch_manifest(patch_dir: &Path) -> Result<Vec<ReviewPatch>, DiffError> {
    let manifest = patch_dir.join("diff.json");
    if manifest.is_file() {
        let text = std::fs::read_to_string(&manifest)
            .map_err(|e| DiffError::io("reading diff.json", e))?;
        let parsed: PatchManifest = serde_json::from_str(&text)
            .map_err(|e| DiffError::Parse(format!("diff.json: {}", e)))?;
        let patches: Vec<ReviewPatch> = parsed
            .content
            .into_iter()
            .filter(|d| d.is_successful)
            .map(|d| ReviewPatch {
                path: patch_dir.join(&d.file_name),
                descriptor: d,
            })
            .collect();
        if patches.is_empty() {
            return Err(DiffError::NoPatchesFound(patch_dir.to_path_buf()));
        }
        return Ok(patches);
    }

    let single = patch_dir.join("diff.patch");
    if single.is_file() {
        return Ok(vec![ReviewPatch {
            descriptor: PatchDescriptor {
                name: "Transformation changes".to_string(),
                file_name: "diff.patch".to_string(),
                is_successful: true,
            },
            path: single,
        }]);
    }
    Err(DiffError::NoPatchesFound(patch_dir.to_path_buf()))
}

/// Walks a job's patches strictly in order. Later patches build on earlier
/// ones, so each is parsed only once its predecessor is resolved.
#[derive(Debug)]
pub struct PatchReview {
    patches: Vec<ReviewPatch>,
    workspace_root: PathBuf,
    temp_root: PathBuf,
    current: usize,
    model: DiffModel,
    shown: bool,
}

impl PatchReview {
    pub fn new(patches: Vec<ReviewPatch>, workspace_root: &Path, temp_root: &Path) -> Self {
        Self {
            patches,
            workspace_root: workspace_root.to_path_buf(),
            temp_root: temp_root.to_path_buf(),
            current: 0,
            model: DiffModel::new(),
            shown: false,
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_patch(&self) -> Option<&ReviewPatch> {
        self.patches.get(self.current)
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.patches.len()
    }

    /// Parse and stage patch `index`. Only the current patch may be shown.
    pub fn show(&mut self, index: usize) -> Result<&PatchFileNode, DiffError> {
        if index != self.current {
            return Err(DiffError::ReviewOrder {
                requested: index,
                current: self.current,
            });
        }
        let patch = self
            .patches
            .get(index)
            .ok_or(DiffError::NothingToReview)?
            .clone();
        if !self.shown {
            self.model.parse_diff(
                &patch.path,
                &self.workspace_root,
                &self.temp_root,
                false,
                &patch.descriptor.name,
            )?;
            self.shown = true;
        }
        self.model.patch().ok_or(DiffError::NothingToReview)
    }

    /// Mutable access to the staged patch, for per-file review marks.
    pub fn model_mut(&mut self) -> &mut DiffModel {
        &mut self.model
    }

    pub fn accept_current(&mut self) -> Result<SaveReport, DiffError> {
        self.require_shown()?;
        let report = self.model.save_changes();
        self.advance("accepted");
        Ok(report)
    }

    pub fn reject_current(&mut self) -> Result<(), DiffError> {
        self.require_shown()?;
        self.model.reject_changes();
        self.advance("rejected");
        Ok(())
    }

    fn require_shown(&self) -> Result<(), DiffError> {
        if self.is_finished() || !self.shown {
            return Err(DiffError::NothingToReview);
        }
        Ok(())
    }

    fn advance(&mut self, outcome: &str) {
        info!(
            "Patch {}/{} {}",
            self.current + 1,
            self.patches.len(),
            outcome
        );
        self.model.clear_changes();
        self.shown = false;
        self.current += 1;
    }
}
