//! Turning a downloaded patch into reviewable, acceptable file changes.

mod model;
mod patch;
mod review;

use std::path::PathBuf;

pub use model::{ChangeEntry, ChangeNode, DiffModel, PatchFileNode, ReviewState, SaveReport};
pub use patch::{FilePatch, Hunk, HunkLine, LineKind, apply_file_patch, parse_patch};
pub use review::{PatchDescriptor, PatchReview, ReviewPatch, read_patch_manifest};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("the patch is empty; no changes were made")]
    EmptyPatch,
    #[error("could not parse patch: {0}")]
    Parse(String),
    #[error("patch refers to a path outside the project: {0}")]
    UnsafePath(String),
    #[error("hunk at line {line} does not apply to {}", path.display())]
    Apply { path: PathBuf, line: usize },
    #[error("patch {requested} cannot be shown before patch {current} is resolved")]
    ReviewOrder { requested: usize, current: usize },
    #[error("no patch is being reviewed")]
    NothingToReview,
    #[error("no patch files found in {}", .0.display())]
    NoPatchesFound(PathBuf),
    #[error("i/o error: {0}")]
    Io(String),
}

impl DiffError {
    pub(crate) fn io(context: &str, e: impl std::fmt::Display) -> Self {
        DiffError::Io(format!("{}: {}", context, e))
    }
}
