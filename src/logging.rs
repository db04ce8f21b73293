use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

use crate::platform::{NativePlatform, Platform};

pub(crate) const LOG_ENV: &str = "QTRANSFORM_LOG";

/// Tees formatted log lines into the transformation log file and, optionally, stdout.
#[derive(Clone)]
pub(crate) struct TeeMakeWriter {
    pub file: Arc<Mutex<File>>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct TeeWriter {
    file: Arc<Mutex<File>>,
    suppress_stdout: bool,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut file) = self.file.lock() {
            file.write_all(buf)?;
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut file) = self.file.lock() {
            file.flush()?;
        }
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// `--verbose` wins; otherwise `QTRANSFORM_LOG`, defaulting to warnings only.
pub(crate) fn log_level(verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Level::WARN)
}

/// Install the global subscriber writing to `<data_dir>/logs/transform.log`.
pub(crate) fn init(data_dir: &Path, verbose: bool) -> Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating {}", log_dir.display()))?;
    NativePlatform::restrict_dir_permissions(&log_dir);
    let log_path = log_dir.join("transform.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let make_writer = TeeMakeWriter {
        file: Arc::new(Mutex::new(file)),
        suppress_stdout: !verbose,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(verbose))
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    Ok(())
}
