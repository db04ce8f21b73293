use std::path::{Component, Path, PathBuf};

use regex::Regex;

use super::DiffError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Remove,
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: LineKind,
    pub text: String,
    /// Followed by `\ No newline at end of file`.
    pub no_eol: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

/// One file's worth of a unified diff. `None` paths stand for `/dev/null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<PathBuf>,
    pub new_path: Option<PathBuf>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Path the change is reported under.
    pub fn path(&self) -> &Path {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn is_deletion(&self) -> bool {
        self.new_path.is_none()
    }
}

fn header_path(raw: &str) -> Result<Option<PathBuf>, DiffError> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim_end();
    if raw == "/dev/null" {
        return Ok(None);
    }
    let stripped = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    let path = PathBuf::from(stripped);
    let safe = !stripped.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(DiffError::UnsafePath(raw.to_string()));
    }
    Ok(Some(path))
}

pub fn parse_patch(text: &str) -> Result<Vec<FilePatch>, DiffError> {
    if text.trim().is_empty() {
        return Err(DiffError::EmptyPatch);
    }
    let hunk_re = Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .map_err(|e| DiffError::Parse(e.to_string()))?;

    let lines: Vec<&str> = text.lines().collect();
    let mut files = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(old_raw) = lines[i].strip_prefix("--- ") else {
            i += 1;
            continue;
        };
        let new_raw = lines
            .get(i + 1)
            .and_then(|l| l.strip_prefix("+++ "))
            .ok_or_else(|| DiffError::Parse(format!("line {}: '---' without '+++'", i + 1)))?;
        let mut file = FilePatch {
            old_path: header_path(old_raw)?,
            new_path: header_path(new_raw)?,
            hunks: Vec::new(),
        };
        if file.old_path.is_none() && file.new_path.is_none() {
            return Err(DiffError::Parse(format!("line {}: both sides are /dev/null", i + 1)));
        }
        i += 2;

        while let Some(caps) = lines.get(i).and_then(|l| hunk_re.captures(l)) {
            let num = |idx: usize, default: usize| {
                caps.get(idx)
                    .map(|m| m.as_str().parse::<usize>().unwrap_or(default))
                    .unwrap_or(default)
            };
            let mut hunk = Hunk {
                old_start: num(1, 0),
                old_len: num(2, 1),
                new_start: num(3, 0),
                new_len: num(4, 1),
                lines: Vec::new(),
            };
            i += 1;
            let (mut old_seen, mut new_seen) = (0, 0);
            while old_seen < hunk.old_len || new_seen < hunk.new_len {
                let Some(line) = lines.get(i) else {
                    return Err(DiffError::Parse(format!(
                        "hunk for {} ends early",
                        file.path().display()
                    )));
                };
                let (kind, body) = match line.chars().next() {
                    Some(' ') => (LineKind::Context, &line[1..]),
                    Some('-') => (LineKind::Remove, &line[1..]),
                    Some('+') => (LineKind::Add, &line[1..]),
                    // Some tools strip the lone space of an empty context line.
                    None => (LineKind::Context, ""),
                    Some('\\') => {
                        mark_no_eol(&mut hunk);
                        i += 1;
                        continue;
                    }
                    Some(_) => {
                        return Err(DiffError::Parse(format!(
                            "line {}: unexpected '{}'",
                            i + 1,
                            line
                        )));
                    }
                };
                match kind {
                    LineKind::Context => {
                        old_seen += 1;
                        new_seen += 1;
                    }
                    LineKind::Remove => old_seen += 1,
                    LineKind::Add => new_seen += 1,
                }
                hunk.lines.push(HunkLine {
                    kind,
                    text: body.to_string(),
                    no_eol: false,
                });
                i += 1;
            }
            if lines.get(i).is_some_and(|l| l.starts_with('\\')) {
                mark_no_eol(&mut hunk);
                i += 1;
            }
            file.hunks.push(hunk);
        }
        files.push(file);
    }

    if files.is_empty() {
        return Err(DiffError::Parse("no file headers found".to_string()));
    }
    Ok(files)
}

fn mark_no_eol(hunk: &mut Hunk) {
    if let Some(last) = hunk.lines.last_mut() {
        last.no_eol = true;
    }
}

/// Apply one file's hunks to `original`. Hunks may have drifted a few lines;
/// the closest matching position at or after the previous hunk wins.
pub fn apply_file_patch(original: &str, patch: &FilePatch) -> Result<String, DiffError> {
    let source: Vec<&str> = original.lines().collect();
    let mut trailing_newline = original.is_empty() || original.ends_with('\n');
    let mut out: Vec<String> = Vec::with_capacity(source.len());
    let mut cursor = 0;

    for hunk in &patch.hunks {
        let old: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|l| l.kind != LineKind::Add)
            .map(|l| l.text.as_str())
            .collect();
        let expected = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        let pos = locate(&source, &old, expected, cursor).ok_or_else(|| {
            DiffError::Apply {
                path: patch.path().to_path_buf(),
                line: hunk.old_start,
            }
        })?;

        out.extend(source[cursor..pos].iter().map(|s| s.to_string()));
        out.extend(
            hunk.lines
                .iter()
                .filter(|l| l.kind != LineKind::Remove)
                .map(|l| l.text.clone()),
        );
        cursor = pos + old.len();

        if cursor >= source.len() {
            trailing_newline = !hunk
                .lines
                .iter()
                .rev()
                .find(|l| l.kind != LineKind::Remove)
                .is_some_and(|l| l.no_eol);
        }
    }
    out.extend(source[cursor..].iter().map(|s| s.to_string()));

    if out.is_empty() {
        return Ok(String::new());
    }
    let mut result = out.join("\n");
    if trailing_newline {
        result.push('\n');
    }
    Ok(result)
}

fn locate(source: &[&str], old: &[&str], expected: usize, floor: usize) -> Option<usize> {
    let fits = |pos: usize| {
        pos >= floor
            && pos + old.len() <= source.len()
            && source[pos..pos + old.len()] == *old
    };
    let span = source.len().max(expected) + 1;
    (0..=span).find_map(|delta| {
        let after = expected + delta;
        if fits(after) {
            return Some(after);
        }
        expected.checked_sub(delta).filter(|p| fits(*p))
    })
}
