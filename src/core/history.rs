//! Tab-separated record of past transformation jobs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::core::scratch::remove_path_logged;
use crate::platform::{NativePlatform, Platform};

pub const HISTORY_FILE: &str = "history.tsv";

const COLUMNS: &[&str] = &[
    "date",
    "project_name",
    "status",
    "duration",
    "diff_patch",
    "summary",
    "job_id",
    "transformation_type",
    "source_jdk",
    "target_jdk",
    "custom_dep_file",
    "custom_build_command",
];

/// Status recorded while a job has not reached a final state yet.
pub const STATUS_IN_PROGRESS: &str = "IN_PROGRESS";
/// Job finished remotely but its results never made it to disk.
pub const STATUS_FAILED_DOWNLOAD: &str = "FAILED_DOWNLOAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub start_time: DateTime<Utc>,
    pub project_name: String,
    pub status: String,
    pub duration: String,
    pub diff_patch: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub job_id: String,
    pub transformation_type: Option<String>,
    pub source_jdk: Option<String>,
    pub target_jdk: Option<String>,
    pub custom_dependency_file: Option<PathBuf>,
    pub custom_build_command: Option<String>,
}

impl HistoryEntry {
    pub fn new(job_id: &str, project_name: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            project_name: project_name.to_string(),
            status: STATUS_IN_PROGRESS.to_string(),
            duration: String::new(),
            diff_patch: None,
            summary: None,
            job_id: job_id.to_string(),
            transformation_type: None,
            source_jdk: None,
            target_jdk: None,
            custom_dependency_file: None,
            custom_build_command: None,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.status == STATUS_IN_PROGRESS || self.status == STATUS_FAILED_DOWNLOAD
    }

    fn to_row(&self) -> String {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        let path = |v: &Option<PathBuf>| {
            v.as_ref()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        [
            self.start_time.to_rfc3339(),
            self.project_name.clone(),
            self.status.clone(),
            self.duration.clone(),
            path(&self.diff_patch),
            path(&self.summary),
            self.job_id.clone(),
            opt(&self.transformation_type),
            opt(&self.source_jdk),
            opt(&self.target_jdk),
            path(&self.custom_dependency_file),
            opt(&self.custom_build_command),
        ]
        .iter()
        .map(|f| clean_field(f))
        .collect::<Vec<_>>()
        .join("\t")
    }

    fn from_row(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            return None;
        }
        let start_time = DateTime::parse_from_rfc3339(fields[0])
            .ok()?
            .with_timezone(&Utc);
        let text = |i: usize| {
            fields
                .get(i)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };
        Some(Self {
            start_time,
            project_name: fields[1].to_string(),
            status: fields[2].to_string(),
            duration: fields[3].to_string(),
            diff_patch: text(4).map(PathBuf::from),
            summary: text(5).map(PathBuf::from),
            job_id: fields[6].to_string(),
            transformation_type: text(7),
            source_jdk: text(8),
            target_jdk: text(9),
            custom_dependency_file: text(10).map(PathBuf::from),
            custom_build_command: text(11),
        })
    }
}

fn clean_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Human-readable elapsed time, e.g. `4 min 12 sec`.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    match (secs / 3600, (secs % 3600) / 60, secs % 60) {
        (0, 0, s) => format!("{} sec", s),
        (0, m, s) => format!("{} min {} sec", m, s),
        (h, m, s) => format!("{} hr {} min {} sec", h, m, s),
    }
}

/// Per-job artifact directory: `<data_dir>/<project>/<job id>`.
pub fn job_artifact_dir(data_dir: &Path, project_name: &str, job_id: &str) -> PathBuf {
    data_dir.join(project_name).join(job_id)
}

/// Single-process store. Writers rewrite or append the whole file under `&self`
/// without locking; one process owns the file at a time.
#[derive(Debug, Clone)]
pub struct JobHistoryStore {
    path: PathBuf,
    data_dir: PathBuf,
    window: Duration,
    max_entries: usize,
}

impl JobHistoryStore {
    pub fn new(data_dir: &Path, window_days: i64, max_entries: usize) -> Self {
        Self {
            path: data_dir.join(HISTORY_FILE),
            data_dir: data_dir.to_path_buf(),
            window: Duration::days(window_days.max(1)),
            max_entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match HistoryEntry::from_row(line) {
                Some(entry) => entries.push(entry),
                None => debug!("Skipping malformed history row {}", n + 1),
            }
        }
        Ok(entries)
    }

    fn write_all(&self, entries: &[HistoryEntry]) -> Result<()> {
        let mut out = COLUMNS.join("\t");
        out.push('\n');
        for entry in entries {
            out.push_str(&entry.to_row());
            out.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        std::fs::write(&self.path, out)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }

    pub fn read(&self) -> Result<Vec<HistoryEntry>> {
        self.read_as_of(Utc::now())
    }

    /// Entries inside the window ending at `now`, newest first, capped.
    pub fn read_as_of(&self, now: DateTime<Utc>) -> Result<Vec<HistoryEntry>> {
        let cutoff = now - self.window;
        let mut entries: Vec<HistoryEntry> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.start_time >= cutoff)
            .collect();
        entries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        entries.truncate(self.max_entries);
        Ok(entries)
    }

    pub fn find(&self, job_id: &str) -> Result<Option<HistoryEntry>> {
        Ok(self.read_all()?.into_iter().find(|e| e.job_id == job_id))
    }

    /// Append a row, writing the header first if the file is new.
    pub fn write(&self, entry: &HistoryEntry) -> Result<()> {
        if !self.path.exists() {
            self.write_all(std::slice::from_ref(entry))?;
        } else {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&self.path)
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            writeln!(file, "{}", entry.to_row())?;
        }
        info!("Recorded job {} in history", entry.job_id);
        if let Err(e) = self.evict_expired(Utc::now()) {
            warn!("History eviction failed: {:#}", e);
        }
        Ok(())
    }

    /// Rewrite the row for `job_id` in place. Returns false when no row matched.
    pub fn update(&self, job_id: &str, apply: impl FnOnce(&mut HistoryEntry)) -> Result<bool> {
        let mut entries = self.read_all()?;
        let Some(entry) = entries.iter_mut().find(|e| e.job_id == job_id) else {
            return Ok(false);
        };
        apply(entry);
        self.write_all(&entries)?;
        debug!("Updated history row for {}", job_id);
        Ok(true)
    }

    /// Drop rows older than the window and delete their artifact directories.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.window;
        let (kept, expired): (Vec<_>, Vec<_>) = self
            .read_all()?
            .into_iter()
            .partition(|e| e.start_time >= cutoff);
        if expired.is_empty() {
            return Ok(0);
        }
        for entry in &expired {
            let dir = job_artifact_dir(&self.data_dir, &entry.project_name, &entry.job_id);
            if dir.exists() {
                remove_path_logged(&dir);
            }
        }
        self.write_all(&kept)?;
        info!("Evicted {} expired history entries", expired.len());
        Ok(expired.len())
    }
}
