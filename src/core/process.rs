use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A command to run, captured in full so it can be logged and replayed by fakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Both streams, stdout first, the way a build log is shown to the user.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` produced more than {limit} bytes of output")]
    OutputLimitExceeded { program: String, limit: usize },
    #[error("`{program}` was cancelled")]
    Cancelled { program: String },
    #[error("i/o error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// Runs commands on the host through tokio, capping how much output is buffered.
pub struct TokioProcessRunner {
    max_output_bytes: usize,
}

impl TokioProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: spec.program.clone(),
            });
        }
        info!("Running `{}` in {}", spec.display(), spec.cwd.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let limit = self.max_output_bytes;
        let stdout_task = tokio::spawn(read_bounded(child.stdout.take(), limit));
        let stderr_task = tokio::spawn(read_bounded(child.stderr.take(), limit));

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };
        let status = match waited {
            Some(status) => status.map_err(|source| ProcessError::Io {
                program: spec.program.clone(),
                source,
            })?,
            None => {
                let _ = child.kill().await;
                return Err(ProcessError::Cancelled {
                    program: spec.program.clone(),
                });
            }
        };

        let (stdout, stdout_overflow) = join_reader(stdout_task, &spec.program).await?;
        let (stderr, stderr_overflow) = join_reader(stderr_task, &spec.program).await?;
        if stdout_overflow || stderr_overflow {
            return Err(ProcessError::OutputLimitExceeded {
                program: spec.program.clone(),
                limit,
            });
        }

        debug!("`{}` exited with {:?}", spec.program, status.code());
        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }
}

/// Keep draining past the limit so the child never blocks on a full pipe.
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    let mut overflow = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if buf.len() + n > limit {
            overflow = true;
            let room = limit.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..room]);
        } else {
            buf.extend_from_slice(&chunk[..n]);
        }
    }
    Ok((buf, overflow))
}

async fn join_reader(
    task: tokio::task::JoinHandle<std::io::Result<(Vec<u8>, bool)>>,
    program: &str,
) -> Result<(Vec<u8>, bool), ProcessError> {
    match task.await {
        Ok(result) => result.map_err(|source| ProcessError::Io {
            program: program.to_string(),
            source,
        }),
        Err(join_err) => Err(ProcessError::Io {
            program: program.to_string(),
            source: std::io::Error::other(join_err.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::new(1024);
        let spec = CommandSpec::new("sh", dir.path()).args(["-c", "echo built; exit 3"]);
        let out = runner.run(&spec, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "built");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_overflow_is_a_distinct_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::new(16);
        let spec = CommandSpec::new("sh", dir.path())
            .args(["-c", "printf '%s' 0123456789012345678901234567890123456789"]);
        let err = runner
            .run(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::OutputLimitExceeded { limit: 16, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::new(1024);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let spec = CommandSpec::new("definitely-not-a-real-binary", dir.path());
        let err = runner.run(&spec, &cancel).await.unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = TokioProcessRunner::new(1024);
        let spec = CommandSpec::new("definitely-not-a-real-binary", dir.path());
        let err = runner
            .run(&spec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
