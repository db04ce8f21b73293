use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A uniquely named working directory owned by one operation.
///
/// Removed on `release` or on drop; removal failures are logged, never raised.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Create `<root>/<prefix>-<suffix>-<unique>`.
    pub fn create(root: &Path, prefix: &str, suffix: &str) -> std::io::Result<Self> {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let name = if suffix.is_empty() {
            format!("{}-{}", prefix, &unique[..12])
        } else {
            format!("{}-{}-{}", prefix, sanitize(suffix), &unique[..12])
        };
        let path = root.join(name);
        std::fs::create_dir_all(&path)?;
        debug!("Created scratch directory {}", path.display());
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }

    /// Delete now. Returns whether the directory is gone.
    pub fn release(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        if self.released {
            return true;
        }
        self.released = true;
        remove_path_logged(&self.path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Remove a file or directory tree, logging instead of failing.
pub fn remove_path_logged(path: &Path) -> bool {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else if path.exists() {
        std::fs::remove_file(path)
    } else {
        return true;
    };
    match result {
        Ok(()) => {
            debug!("Removed {}", path.display());
            true
        }
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Temp files and directories tracked for one operation, each removed independently.
#[derive(Debug, Default)]
pub struct TempResources {
    dirs: Vec<ScratchDir>,
    files: Vec<PathBuf>,
}

impl TempResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_dir(&mut self, dir: ScratchDir) -> PathBuf {
        let path = dir.path().to_path_buf();
        self.dirs.push(dir);
        path
    }

    pub fn track_file(&mut self, path: PathBuf) {
        self.files.push(path);
    }

    /// Remove everything. Returns how many resources could not be removed.
    pub fn release_all(&mut self) -> usize {
        let mut failures = 0;
        for file in self.files.drain(..) {
            if !remove_path_logged(&file) {
                failures += 1;
            }
        }
        for dir in self.dirs.drain(..) {
            if !dir.release() {
                failures += 1;
            }
        }
        failures
    }
}

impl Drop for TempResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Copy a directory tree, skipping directory names in `skip`.
pub fn copy_tree(src: &Path, dest: &Path, skip: &[&str]) -> std::io::Result<u64> {
    std::fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let from = entry.path();
        let to = dest.join(&name);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if skip.iter().any(|s| name == std::ffi::OsStr::new(s)) {
                continue;
            }
            copied += copy_tree(&from, &to, skip)?;
        } else if file_type.is_file() {
            std::fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let dir = ScratchDir::create(root.path(), "q-test", "job/1").unwrap();
            std::fs::write(dir.join("a.txt"), "x").unwrap();
            assert!(dir.path().file_name().unwrap().to_string_lossy().starts_with("q-test-job_1-"));
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn release_all_continues_past_missing_resources() {
        let root = tempfile::tempdir().unwrap();
        let mut resources = TempResources::new();
        let first = resources.track_dir(ScratchDir::create(root.path(), "a", "").unwrap());
        let second = resources.track_dir(ScratchDir::create(root.path(), "b", "").unwrap());
        std::fs::remove_dir_all(&first).unwrap();
        let file = root.path().join("tracked.zip");
        std::fs::write(&file, "zip").unwrap();
        resources.track_file(file.clone());

        assert_eq!(resources.release_all(), 0);
        assert!(!second.exists());
        assert!(!file.exists());
    }

    #[test]
    fn copy_tree_skips_build_output() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src");
        std::fs::create_dir_all(src.join("target/classes")).unwrap();
        std::fs::create_dir_all(src.join("app")).unwrap();
        std::fs::write(src.join("target/classes/A.class"), "x").unwrap();
        std::fs::write(src.join("app/A.java"), "class A {}").unwrap();
        std::fs::write(src.join("pom.xml"), "<project/>").unwrap();

        let dest = root.path().join("dest");
        let copied = copy_tree(&src, &dest, &["target"]).unwrap();
        assert_eq!(copied, 2);
        assert!(dest.join("app/A.java").exists());
        assert!(!dest.join("target").exists());
    }
}
