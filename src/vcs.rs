//! Shared plumbing for the command-line VCS adapters.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::error::{Result, ReviewError};
use crate::models::{BackendKind, CommitPage, DiffEntry, ToolStatus};

/// History and diff access for one backend.
#[async_trait]
pub trait VcsAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cached capability probe of the backend's executable.
    async fn probe(&self) -> ToolStatus;

    /// Drops the cached probe so the next call checks the tool again.
    async fn invalidate_probe(&self);

    async fn list_commits(&self, repo: &Path, page: u32, page_size: u32) -> Result<CommitPage>;

    async fn get_diff(&self, repo: &Path, revision: &str) -> Result<Vec<DiffEntry>>;
}

/// Runs one VCS executable with a bounded execution time.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: PathBuf,
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn describe(&self, args: &[&str]) -> String {
        let mut line = self.program.display().to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Runs the tool and returns its stdout, lossily decoded.
    ///
    /// A missing executable maps to `ToolUnavailable`; a non-zero exit or a
    /// timeout maps to `VcsCommandFailed`.
    pub async fn run(&self, cwd: Option<&Path>, args: &[&str], hint: &str) -> Result<String> {
        let described = self.describe(args);
        tracing::debug!("Running {}", described);

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReviewError::ToolUnavailable {
                    tool: self.program.display().to_string(),
                    hint: hint.to_string(),
                }
            } else {
                ReviewError::command_failed(&described, format!("failed to spawn: {}", e))
            }
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| ReviewError::command_failed(&described, e.to_string()))?
            }
            Err(_) => {
                tracing::warn!("{} timed out after {:?}", described, self.timeout);
                return Err(ReviewError::command_failed(
                    &described,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!("{} exited with {}: {}", described, output.status, stderr);
            let stderr = if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            };
            return Err(ReviewError::command_failed(described, stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Checks that the tool answers `args` (usually a version query).
    pub async fn probe(&self, args: &[&str], hint: &str) -> ToolStatus {
        match self.run(None, args, hint).await {
            Ok(out) => ToolStatus::Available {
                version: out.lines().next().unwrap_or_default().trim().to_string(),
            },
            Err(ReviewError::ToolUnavailable { .. }) => ToolStatus::Unavailable {
                reason: format!("{} was not found. {}", self.program.display(), hint),
            },
            Err(e) => ToolStatus::Unknown {
                detail: e.to_string(),
            },
        }
    }
}

/// Per-adapter cache for a capability probe, kept until invalidated.
#[derive(Debug, Default)]
pub struct ProbeCache {
    status: RwLock<Option<ToolStatus>>,
}

impl ProbeCache {
    pub async fn get_or_probe<F, Fut>(&self, probe: F) -> ToolStatus
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ToolStatus>,
    {
        if let Some(status) = self.status.read().await.as_ref() {
            return status.clone();
        }

        let mut slot = self.status.write().await;
        if let Some(status) = slot.as_ref() {
            return status.clone();
        }
        let status = probe().await;
        // An inconclusive probe is not worth remembering.
        if !matches!(status, ToolStatus::Unknown { .. }) {
            *slot = Some(status.clone());
        }
        status
    }

    pub async fn invalidate(&self) {
        *self.status.write().await = None;
    }
}

/// Rejects missing working copies before any process is spawned.
///
/// A nonexistent working directory would otherwise fail the spawn with
/// `NotFound` and read as a missing executable.
pub(crate) fn require_repo(repo: &Path) -> Result<()> {
    if repo.as_os_str().is_empty() {
        return Err(ReviewError::InvalidArgument(
            "repoPath is required".to_string(),
        ));
    }
    if !repo.is_dir() {
        return Err(ReviewError::InvalidArgument(format!(
            "repoPath {} is not a directory",
            repo.display()
        )));
    }
    Ok(())
}
