//! Human-in-the-loop dependency resolution for jobs paused on a dependency they
//! could not upgrade by themselves.

mod coordinator;
mod pom;
mod report;

pub use coordinator::{HilCoordinator, HilError, HilManifest, HilSession};
pub use pom::{VERSION_SENTINEL, replace_dependency_version};
pub use report::{
    DependencyUpdates, REPORT_FILE_NAME, VersionChoices, compare_versions,
    parse_dependency_report,
};

#[cfg(test)]
mod tests;
