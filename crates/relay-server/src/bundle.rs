//! Streams a gzip'd tarball of the relay's source tree.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

/// Byte stream of a gzip'd tar archive.
pub type BundleStream = BoxStream<'static, Result<Bytes, io::Error>>;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const STDERR_LIMIT: usize = 4096;

/// Excluded from every bundle, on top of the credential file itself.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".env",
    ".env.*",
    "*.env",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "target",
    ".cache",
    "*.log",
    "logs",
    ".tmp*",
];

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("source directory {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("failed to start tar: {0}")]
    Spawn(#[source] io::Error),

    #[error("tar produced no output ({0})")]
    EmptyArchive(String),

    #[error("failed to read tar output: {0}")]
    Read(#[source] io::Error),
}

pub struct BundleStreamer {
    source_dir: PathBuf,
    excludes: Vec<String>,
}

impl BundleStreamer {
    /// `credential_file` is excluded by name wherever it appears in the tree.
    pub fn new(source_dir: impl Into<PathBuf>, credential_file: Option<String>) -> Self {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        if let Some(name) = credential_file {
            excludes.insert(0, name);
        }
        Self {
            source_dir: source_dir.into(),
            excludes,
        }
    }

    /// Best-effort `git pull` plus submodule update. Failures are only logged.
    pub async fn refresh_source(&self) {
        if !self.source_dir.join(".git").exists() {
            tracing::debug!(
                "{} is not a git checkout, skipping refresh",
                self.source_dir.display()
            );
            return;
        }

        self.run_git(&["pull", "--ff-only", "--quiet"]).await;
        self.run_git(&["submodule", "update", "--init", "--recursive", "--quiet"])
            .await;
    }

    async fn run_git(&self, args: &[&str]) {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.source_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(GIT_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!("git {} succeeded", args.join(" "));
            }
            Ok(Ok(output)) => tracing::warn!(
                "git {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Ok(Err(e)) => tracing::warn!("Failed to run git {}: {}", args.join(" "), e),
            Err(_) => tracing::warn!(
                "git {} timed out after {}s",
                args.join(" "),
                GIT_TIMEOUT.as_secs()
            ),
        }
    }

    fn tar_args(&self) -> Vec<String> {
        let mut args = vec!["-czf".to_string(), "-".to_string()];
        args.extend(self.excludes.iter().map(|pattern| format!("--exclude={pattern}")));
        args.push("-C".to_string());
        args.push(self.source_dir.display().to_string());
        args.push(".".to_string());
        args
    }

    /// Spawn `tar` and hand back its stdout as a byte stream.
    pub async fn stream(&self) -> Result<BundleStream, BundleError> {
        if !self.source_dir.is_dir() {
            return Err(BundleError::SourceMissing(self.source_dir.clone()));
        }

        let mut command = Command::new("tar");
        command.args(self.tar_args());
        let stream = stream_stdout(command).await?;
        tracing::info!("Streaming bundle of {}", self.source_dir.display());
        Ok(stream)
    }
}

/// Run `command` and stream its stdout.
///
/// The first chunk is read before returning so an early failure surfaces
/// as an error instead of an empty 200. A non-zero exit after output has
/// started ends the stream with an error. Dropping the stream kills the
/// process.
async fn stream_stdout(mut command: Command) -> Result<BundleStream, BundleError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(BundleError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BundleError::Spawn(io::Error::other("tar stdout not captured")))?;
    let stderr = child.stderr.take().map(collect_stderr);
    let mut process = TarProcess {
        child,
        stderr,
        finished: false,
    };
    let mut reader = ReaderStream::new(stdout);

    let first = match reader.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(BundleError::Read(e)),
        None => {
            let detail = process.finish().await.err().map_or_else(
                || "tar exited cleanly".to_string(),
                |e| e.to_string(),
            );
            return Err(BundleError::EmptyArchive(detail));
        }
    };

    Ok(async_stream::stream! {
        yield Ok(first);
        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        match process.finish().await {
            Ok(()) => tracing::info!("Bundle stream complete"),
            Err(e) => yield Err(e),
        }
    }
    .boxed())
}

/// Owns the `tar` child for the life of one response stream.
struct TarProcess {
    child: Child,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl TarProcess {
    /// Wait for exit; a non-zero status becomes an error carrying stderr.
    async fn finish(&mut self) -> io::Result<()> {
        let status: ExitStatus = self.child.wait().await?;
        self.finished = true;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::error!("tar exited with {}: {}", status, stderr.trim());
        Err(io::Error::other(format!("tar exited with {status}")))
    }
}

impl Drop for TarProcess {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Bundle stream dropped before completion, killing tar");
            if let Err(e) = self.child.start_kill() {
                tracing::debug!("tar already gone: {}", e);
            }
        }
    }
}

fn collect_stderr(mut stderr: tokio::process::ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf.truncate(STDERR_LIMIT);
        String::from_utf8_lossy(&buf).into_owned()
    })
}
