use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

use crate::diff::split_git_patch;
use crate::error::{Result, ReviewError};
use crate::models::{BackendKind, CommitPage, CommitRecord, DiffEntry, ToolStatus};
use crate::pagination::paginate;
use crate::vcs::{require_repo, ProbeCache, ToolRunner, VcsAdapter};

const GIT_HINT: &str = "Install git and make sure it is on PATH, or set GIT_BIN.";

/// One JSON object per output line; `%x22` is a literal double quote.
const LOG_FORMAT: &str =
    "--pretty=format:{%x22hash%x22:%x22%H%x22,%x22author%x22:%x22%an%x22,%x22date%x22:%x22%aI%x22,%x22message%x22:%x22%s%x22}";

/// The only shape a log line may take.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LogLine {
    hash: String,
    author: String,
    date: String,
    message: String,
}

impl From<LogLine> for CommitRecord {
    fn from(line: LogLine) -> Self {
        CommitRecord {
            id: line.hash,
            author: line.author,
            timestamp: line.date,
            message: line.message,
        }
    }
}

/// Parses `git log` output, dropping lines that do not match the grammar.
///
/// Returns the parsed records and how many non-blank lines were dropped.
pub fn parse_log_lines(output: &str) -> (Vec<CommitRecord>, usize) {
    let mut commits = Vec::new();
    let mut skipped = 0;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<LogLine>(line) {
            Ok(parsed) => commits.push(parsed.into()),
            Err(e) => {
                skipped += 1;
                tracing::warn!("Skipping unparseable commit line ({}): {}", e, line);
            }
        }
    }

    (commits, skipped)
}

/// History access through the `git` executable.
pub struct GitAdapter {
    runner: ToolRunner,
    probe: ProbeCache,
}

impl GitAdapter {
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            probe: ProbeCache::default(),
        }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let mut full = vec!["--no-pager", "-c", "color.ui=false"];
        full.extend_from_slice(args);
        self.runner.run(Some(repo), &full, GIT_HINT).await
    }

    /// Resolves HEAD, or `None` for a repository with no commits yet.
    async fn resolve_head(&self, repo: &Path) -> Result<Option<String>> {
        match self.git(repo, &["rev-parse", "--verify", "-q", "HEAD"]).await {
            Ok(out) => Ok(Some(out.trim().to_string())),
            Err(err) => {
                // `-q` fails silently on an unborn branch; outside a repository
                // this call reports the real cause.
                self.git(repo, &["rev-parse", "--git-dir"]).await?;
                tracing::debug!("{:?} has no commits yet ({})", repo, err);
                Ok(None)
            }
        }
    }

    async fn count_commits(&self, repo: &Path, head: &str) -> Result<usize> {
        let out = self
            .git(repo, &["rev-list", "--count", "--no-merges", head])
            .await?;
        out.trim().parse::<usize>().map_err(|e| {
            ReviewError::command_failed(
                "git rev-list --count",
                format!("unexpected count '{}': {}", out.trim(), e),
            )
        })
    }
}

#[async_trait]
impl VcsAdapter for GitAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Git
    }

    async fn probe(&self) -> ToolStatus {
        self.probe
            .get_or_probe(|| self.runner.probe(&["--version"], GIT_HINT))
            .await
    }

    async fn invalidate_probe(&self) {
        self.probe.invalidate().await;
    }

    async fn list_commits(&self, repo: &Path, page: u32, page_size: u32) -> Result<CommitPage> {
        require_repo(repo)?;
        // Validate before touching the repository.
        paginate(0, page, page_size)?;

        let Some(head) = self.resolve_head(repo).await? else {
            return Ok(CommitPage::empty(0, page, page_size));
        };
        let total = self.count_commits(repo, &head).await?;
        let window = paginate(total, page, page_size)?;

        if window.is_empty() {
            tracing::debug!(
                "Page {} of {:?} is past the end ({} commits)",
                page,
                repo,
                total
            );
            return Ok(CommitPage::empty(total, page, page_size));
        }

        let skip = format!("--skip={}", window.skip);
        let max_count = format!("--max-count={}", window.count);
        let out = self
            .git(
                repo,
                &[
                    "log",
                    "--no-merges",
                    skip.as_str(),
                    max_count.as_str(),
                    LOG_FORMAT,
                    head.as_str(),
                ],
            )
            .await?;

        let (commits, skipped) = parse_log_lines(&out);
        tracing::info!(
            "Listed {} commits (page {}, size {}, total {}) from {:?}",
            commits.len(),
            page,
            page_size,
            total,
            repo
        );

        Ok(CommitPage {
            commits,
            total,
            page,
            page_size,
            skipped,
        })
    }

    async fn get_diff(&self, repo: &Path, revision: &str) -> Result<Vec<DiffEntry>> {
        require_repo(repo)?;
        let revision = revision.trim();
        if revision.is_empty() || revision.starts_with('-') {
            return Err(ReviewError::InvalidArgument(format!(
                "invalid git revision '{}'",
                revision
            )));
        }

        let out = self
            .git(
                repo,
                &["show", "--format=", "--patch", "--no-color", revision, "--"],
            )
            .await?;
        Ok(split_git_patch(&out))
    }
}
