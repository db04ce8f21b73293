use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Maven executable looked up on `PATH` (`"mvn"` / `"mvn.cmd"`).
    fn maven_executable() -> &'static str;

    /// Maven wrapper script name checked in the project root.
    fn maven_wrapper_name() -> &'static str;

    /// `javap` binary, preferring the one under `java_home` when given.
    fn javap_executable(java_home: Option<&Path>) -> PathBuf;

    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Root data directory for transformation history and artifacts.
    /// Both platforms use `~/.aws/transform`.
    fn data_dir() -> PathBuf;
}

/// Honour `QTRANSFORM_DATA_DIR` so tests and sandboxes can relocate state.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var_os("QTRANSFORM_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

pub(crate) fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}

/// Resolve the Maven command for a project: its wrapper if present, else `fallback`.
pub fn maven_for_project(project: &Path, fallback: &str) -> String {
    let wrapper = project.join(NativePlatform::maven_wrapper_name());
    if wrapper.is_file() {
        wrapper.to_string_lossy().to_string()
    } else {
        fallback.to_string()
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
