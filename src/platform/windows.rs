use std::path::{Path, PathBuf};

use super::{Platform, home_dir, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn maven_executable() -> &'static str {
        "mvn.cmd"
    }

    fn maven_wrapper_name() -> &'static str {
        "mvnw.cmd"
    }

    fn javap_executable(java_home: Option<&Path>) -> PathBuf {
        match java_home {
            Some(home) => home.join("bin").join("javap.exe"),
            None => PathBuf::from("javap.exe"),
        }
    }

    fn restrict_dir_permissions(_path: &Path) {}

    fn data_dir() -> PathBuf {
        resolve_data_dir(home_dir().join(".aws").join("transform"))
    }
}
