use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{Platform, home_dir, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn maven_executable() -> &'static str {
        "mvn"
    }

    fn maven_wrapper_name() -> &'static str {
        "mvnw"
    }

    fn javap_executable(java_home: Option<&Path>) -> PathBuf {
        match java_home {
            Some(home) => home.join("bin").join("javap"),
            None => PathBuf::from("javap"),
        }
    }

    fn restrict_dir_permissions(path: &Path) {
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(home_dir().join(".aws").join("transform"))
    }
}
