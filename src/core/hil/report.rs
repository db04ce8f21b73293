//! The Maven versions-plugin aggregate report (`dependency-updates-aggregate-report.xml`).

use std::cmp::Ordering;

use quick_xml::Reader;
use quick_xml::events::Event;

use super::HilError;

pub const REPORT_FILE_NAME: &str = "dependency-updates-aggregate-report.xml";

/// Newer versions available for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyUpdates {
    pub group_id: String,
    pub artifact_id: String,
    pub current_version: Option<String>,
    pub latest_version: Option<String>,
    pub major_versions: Vec<String>,
    pub minor_versions: Vec<String>,
    pub incremental_versions: Vec<String>,
}

impl DependencyUpdates {
    pub fn is_empty(&self) -> bool {
        self.latest_version.is_none()
            && self.major_versions.is_empty()
            && self.minor_versions.is_empty()
            && self.incremental_versions.is_empty()
    }
}

/// Parse every `<dependency>` entry of the report.
pub fn parse_dependency_report(xml: &str) -> Result<Vec<DependencyUpdates>, HilError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut current: Option<DependencyUpdates> = None;
    let mut element = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| HilError::ReportParse(e.to_string()))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "dependency" {
                    current = Some(DependencyUpdates::default());
                }
                element = name;
            }
            Event::Text(t) => {
                let Some(dep) = current.as_mut() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| HilError::ReportParse(e.to_string()))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                match element.as_str() {
                    "groupId" => dep.group_id = text,
                    "artifactId" => dep.artifact_id = text,
                    "currentVersion" => dep.current_version = Some(text),
                    "lastVersion" => dep.latest_version = Some(text),
                    "major" => dep.major_versions.push(text),
                    "minor" => dep.minor_versions.push(text),
                    "incremental" => dep.incremental_versions.push(text),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"dependency"
                    && let Some(dep) = current.take()
                {
                    out.push(dep);
                }
                element.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// Order dotted versions numerically where possible (`1.10` > `1.9`), textually otherwise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> Vec<String> {
        v.split(['.', '-'])
            .map(str::to_string)
            .collect()
    };
    let (pa, pb) = (split(a), split(b));
    for (x, y) in pa.iter().zip(pb.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // `1.0` sorts after `1.0-beta`, but `1.0.1` after `1.0`.
    match pa.len().cmp(&pb.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater if pa[pb.len()].parse::<u64>().is_ok() => Ordering::Greater,
        Ordering::Greater => Ordering::Less,
        Ordering::Less if pb[pa.len()].parse::<u64>().is_ok() => Ordering::Less,
        Ordering::Less => Ordering::Greater,
    }
}

/// The menu offered to the user for one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionChoices {
    pub latest: Option<String>,
    pub highest_major: Option<String>,
    pub highest_minor: Option<String>,
    /// Every candidate, newest first, without duplicates.
    pub all: Vec<String>,
}

impl VersionChoices {
    pub fn from_updates(updates: &DependencyUpdates) -> Self {
        let highest = |versions: &[String]| {
            versions
                .iter()
                .max_by(|a, b| compare_versions(a, b))
                .cloned()
        };
        let mut all: Vec<String> = updates
            .major_versions
            .iter()
            .chain(&updates.minor_versions)
            .chain(&updates.incremental_versions)
            .chain(updates.latest_version.iter())
            .cloned()
            .collect();
        all.sort_by(|a, b| compare_versions(b, a));
        all.dedup();
        Self {
            latest: updates.latest_version.clone(),
            highest_major: highest(&updates.major_versions),
            highest_minor: highest(&updates.minor_versions),
            all,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Menu order: highest major, highest minor, then the rest newest first.
    pub fn menu(&self) -> Vec<String> {
        let mut menu: Vec<String> = Vec::new();
        for v in self
            .highest_major
            .iter()
            .chain(self.highest_minor.iter())
            .chain(self.all.iter())
        {
            if !menu.contains(v) {
                menu.push(v.clone());
            }
        }
        menu
    }
}
