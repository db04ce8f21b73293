use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use sha2::{Digest, Sha256};
use zip::write::SimpleFileOptions;

/// Writes a deflated zip one entry at a time.
pub struct ZipBuilder {
    writer: zip::ZipWriter<File>,
    path: PathBuf,
    entries: usize,
}

impl ZipBuilder {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create archive {}", path.display()))?;
        Ok(Self {
            writer: zip::ZipWriter::new(file),
            path: path.to_path_buf(),
            entries: 0,
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
    }

    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.writer
            .start_file(normalize_entry_name(name), Self::options())
            .with_context(|| format!("Failed to add {} to archive", name))?;
        self.writer.write_all(bytes)?;
        self.entries += 1;
        Ok(())
    }

    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<()> {
        let mut contents = Vec::new();
        File::open(source)
            .with_context(|| format!("Failed to open {}", source.display()))?
            .read_to_end(&mut contents)?;
        self.add_bytes(name, &contents)
    }

    /// Add every file under `dir`, named `<prefix>/<relative path>`.
    pub fn add_dir(&mut self, prefix: &str, dir: &Path, skip_dirs: &[&str]) -> Result<usize> {
        let mut added = 0;
        for file in list_files(dir, skip_dirs)? {
            let rel = file.strip_prefix(dir).unwrap_or(&file);
            let name = if prefix.is_empty() {
                rel.to_string_lossy().to_string()
            } else {
                format!("{}/{}", prefix.trim_end_matches('/'), rel.to_string_lossy())
            };
            self.add_file(&name, &file)?;
            added += 1;
        }
        Ok(added)
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn finish(self) -> Result<PathBuf> {
        self.writer
            .finish()
            .with_context(|| format!("Failed to finalize archive {}", self.path.display()))?;
        Ok(self.path)
    }
}

fn normalize_entry_name(name: &str) -> String {
    name.replace('\\', "/")
}

/// Extract a zip into `dest`. Entries escaping `dest` are rejected by the zip reader.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest)
        .with_context(|| format!("Failed to extract {}", archive.display()))?;
    Ok(())
}

/// Recursively list regular files, skipping directories named in `skip_dirs`.
pub fn list_files(dir: &Path, skip_dirs: &[&str]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir, skip_dirs, &mut out)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, skip_dirs: &[&str], out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            let name = entry.file_name();
            if skip_dirs.iter().any(|s| name == std::ffi::OsStr::new(s)) {
                continue;
            }
            walk(&path, skip_dirs, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Base64-encoded SHA-256 of a file, as sent alongside uploads.
pub fn sha256_base64(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_then_extract_keeps_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("project");
        std::fs::create_dir_all(src.join("src/main/java")).unwrap();
        std::fs::create_dir_all(src.join("target")).unwrap();
        std::fs::write(src.join("pom.xml"), "<project/>").unwrap();
        std::fs::write(src.join("src/main/java/App.java"), "class App {}").unwrap();
        std::fs::write(src.join("target/App.class"), "cafebabe").unwrap();

        let zip_path = dir.path().join("out/code.zip");
        let mut builder = ZipBuilder::create(&zip_path).unwrap();
        let added = builder.add_dir("sourceCode", &src, &["target"]).unwrap();
        builder.add_bytes("manifest.json", b"{}").unwrap();
        assert_eq!(added, 2);
        assert_eq!(builder.entries(), 3);
        builder.finish().unwrap();

        let out = dir.path().join("extracted");
        extract_zip(&zip_path, &out).unwrap();
        assert_eq!(
            std::fs::read_to_string(out.join("sourceCode/src/main/java/App.java")).unwrap(),
            "class App {}"
        );
        assert!(out.join("manifest.json").exists());
        assert!(!out.join("sourceCode/target").exists());
    }

    #[test]
    fn checksum_is_base64_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_base64(&path).unwrap(),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn extracting_garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.zip");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(extract_zip(&path, &dir.path().join("out")).is_err());
    }
}
