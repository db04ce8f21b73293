use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{DiffError, FilePatch, apply_file_patch, parse_patch};
use crate::core::scratch::ScratchDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    ToReview,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNode {
    Modified {
        original_path: PathBuf,
        staged_path: PathBuf,
    },
    Added {
        workspace_path: PathBuf,
        staged_path: PathBuf,
    },
    Deleted {
        workspace_path: PathBuf,
    },
}

impl ChangeNode {
    pub fn workspace_path(&self) -> &Path {
        match self {
            ChangeNode::Modified { original_path, .. } => original_path,
            ChangeNode::Added { workspace_path, .. } | ChangeNode::Deleted { workspace_path } => {
                workspace_path
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeNode::Modified { .. } => "modified",
            ChangeNode::Added { .. } => "added",
            ChangeNode::Deleted { .. } => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub relative_path: PathBuf,
    pub node: ChangeNode,
    pub review: ReviewState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFileNode {
    pub label: String,
    pub source_patch: PathBuf,
    pub children: Vec<ChangeEntry>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Staged view of one patch against a workspace.
///
/// Normal mode copies every touched file into a private staging directory and
/// patches the copies, leaving the workspace alone until [`DiffModel::save_changes`].
/// Intermediate mode patches `workspace_root` in place; it is meant for trees
/// that are already private scratch copies.
#[derive(Debug, Default)]
pub struct DiffModel {
    staging: Option<ScratchDir>,
    patch: Option<PatchFileNode>,
}

impl DiffModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patch(&self) -> Option<&PatchFileNode> {
        self.patch.as_ref()
    }

    pub fn parse_diff(
        &mut self,
        patch_path: &Path,
        workspace_root: &Path,
        temp_root: &Path,
        intermediate: bool,
        label: &str,
    ) -> Result<&PatchFileNode, DiffError> {
        let text = std::fs::read_to_string(patch_path)
            .map_err(|e| DiffError::io(&format!("reading {}", patch_path.display()), e))?;
        let files = parse_patch(&text)?;

        let staging = if intermediate {
            None
        } else {
            let dir = ScratchDir::create(temp_root, "q-diff", label)
                .map_err(|e| DiffError::io("creating staging directory", e))?;
            stage_originals(&files, workspace_root, dir.path())?;
            Some(dir)
        };
        let staging_root = staging
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .unwrap_or_else(|| workspace_root.to_path_buf());

        let mut children = Vec::new();
        for file in &files {
            children.extend(apply_one(file, workspace_root, &staging_root, intermediate)?);
        }
        info!(
            "Parsed {} ({} file changes, intermediate: {})",
            patch_path.display(),
            children.len(),
            intermediate
        );

        self.staging = staging;
        Ok(self.patch.insert(PatchFileNode {
            label: label.to_string(),
            source_patch: patch_path.to_path_buf(),
            children,
        }))
    }

    pub fn set_review(&mut self, relative_path: &Path, state: ReviewState) -> bool {
        let Some(entry) = self
            .patch
            .as_mut()
            .and_then(|p| p.children.iter_mut().find(|c| c.relative_path == relative_path))
        else {
            return false;
        };
        entry.review = state;
        true
    }

    /// Write every change not explicitly rejected into the workspace.
    /// A failing file is logged and skipped; the rest of the batch still lands.
    pub fn save_changes(&mut self) -> SaveReport {
        let mut report = SaveReport::default();
        let Some(patch) = self.patch.as_mut() else {
            return report;
        };
        for entry in patch
            .children
            .iter_mut()
            .filter(|c| c.review != ReviewState::Rejected)
        {
            match save_one(&entry.node) {
                Ok(SaveAction::Written(path)) => report.written.push(path),
                Ok(SaveAction::Removed(path)) => report.removed.push(path),
                Ok(SaveAction::Unchanged) => {}
                Err(e) => {
                    let target = entry.node.workspace_path().to_path_buf();
                    warn!("Failed to save {}: {}", target.display(), e);
                    report.failed.push((target, e.to_string()));
                    continue;
                }
            }
            entry.review = ReviewState::Accepted;
        }
        info!(
            "Saved changes: {} written, {} removed, {} failed",
            report.written.len(),
            report.removed.len(),
            report.failed.len()
        );
        self.staging = None;
        report
    }

    /// Mark everything rejected and drop the staged copies. The workspace is untouched.
    pub fn reject_changes(&mut self) {
        if let Some(patch) = self.patch.as_mut() {
            for entry in &mut patch.children {
                entry.review = ReviewState::Rejected;
            }
            debug!("Rejected changes from {}", patch.source_patch.display());
        }
        self.staging = None;
    }

    pub fn clear_changes(&mut self) {
        self.patch = None;
        self.staging = None;
    }
}

fn stage_originals(files: &[FilePatch], workspace_root: &Path, staging: &Path) -> Result<(), DiffError> {
    for rel in files
        .iter()
        .flat_map(|f| [f.old_path.as_deref(), f.new_path.as_deref()])
        .flatten()
    {
        let source = workspace_root.join(rel);
        if !source.is_file() {
            continue;
        }
        let dest = staging.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DiffError::io(&format!("staging {}", rel.display()), e))?;
        }
        std::fs::copy(&source, &dest)
            .map_err(|e| DiffError::io(&format!("staging {}", rel.display()), e))?;
    }
    Ok(())
}

fn apply_one(
    file: &FilePatch,
    workspace_root: &Path,
    staging_root: &Path,
    intermediate: bool,
) -> Result<Vec<ChangeEntry>, DiffError> {
    let mut entries = Vec::new();
    let entry = |relative_path: &Path, node| ChangeEntry {
        relative_path: relative_path.to_path_buf(),
        node,
        review: ReviewState::ToReview,
    };

    let Some(new_rel) = file.new_path.as_deref() else {
        let old_rel = file.path();
        if intermediate {
            remove_if_present(&workspace_root.join(old_rel))
                .map_err(|e| DiffError::io(&format!("deleting {}", old_rel.display()), e))?;
        }
        entries.push(entry(
            old_rel,
            ChangeNode::Deleted {
                workspace_path: workspace_root.join(old_rel),
            },
        ));
        return Ok(entries);
    };

    let source_rel = file.old_path.as_deref().unwrap_or(new_rel);
    let original = match std::fs::read_to_string(staging_root.join(source_rel)) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(DiffError::io(&format!("reading {}", source_rel.display()), e)),
    };
    let existed = file.old_path.is_some() && workspace_root.join(new_rel).is_file();
    let patched = apply_file_patch(&original, file)?;

    let staged_path = staging_root.join(new_rel);
    if let Some(parent) = staged_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DiffError::io(&format!("writing {}", new_rel.display()), e))?;
    }
    std::fs::write(&staged_path, patched)
        .map_err(|e| DiffError::io(&format!("writing {}", new_rel.display()), e))?;

    let workspace_path = workspace_root.join(new_rel);
    let node = if existed {
        ChangeNode::Modified {
            original_path: workspace_path,
            staged_path,
        }
    } else {
        ChangeNode::Added {
            workspace_path,
            staged_path,
        }
    };
    entries.push(entry(new_rel, node));

    if let Some(old_rel) = file.old_path.as_deref()
        && old_rel != new_rel
        && workspace_root.join(old_rel).is_file()
    {
        if intermediate {
            remove_if_present(&workspace_root.join(old_rel))
                .map_err(|e| DiffError::io(&format!("deleting {}", old_rel.display()), e))?;
        }
        entries.push(entry(
            old_rel,
            ChangeNode::Deleted {
                workspace_path: workspace_root.join(old_rel),
            },
        ));
    }
    Ok(entries)
}

enum SaveAction {
    Written(PathBuf),
    Removed(PathBuf),
    Unchanged,
}

fn save_one(node: &ChangeNode) -> std::io::Result<SaveAction> {
    match node {
        ChangeNode::Modified {
            original_path: target,
            staged_path,
        }
        | ChangeNode::Added {
            workspace_path: target,
            staged_path,
        } => {
            if target == staged_path {
                return Ok(SaveAction::Unchanged);
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(staged_path, target)?;
            Ok(SaveAction::Written(target.clone()))
        }
        ChangeNode::Deleted { workspace_path } => {
            if remove_if_present(workspace_path)? {
                Ok(SaveAction::Removed(workspace_path.clone()))
            } else {
                Ok(SaveAction::Unchanged)
            }
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
