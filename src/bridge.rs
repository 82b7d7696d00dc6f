//! Facade consumed by the presentation layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::error::{Result, ReviewError};
use crate::git::GitAdapter;
use crate::models::{BackendKind, CommitPage, DiffEntry, ToolStatus};
use crate::relay::{AiRelay, ChunkStream, CompletionPolicy};
use crate::svn::SvnAdapter;
use crate::throttle::CallThrottle;
use crate::vcs::{ToolRunner, VcsAdapter};

const LIST_COMMITS: &str = "list_commits";

/// Answers "which working copy?" for the UI.
pub trait DirectoryPicker: Send + Sync {
    fn select_directory(&self) -> Option<PathBuf>;
}

/// Picker that returns a configured working copy if it still exists.
pub struct ConfiguredDirectory(pub Option<PathBuf>);

impl DirectoryPicker for ConfiguredDirectory {
    fn select_directory(&self) -> Option<PathBuf> {
        self.0.as_ref().filter(|p| p.is_dir()).cloned()
    }
}

pub type HistoryKey = (BackendKind, PathBuf, u32, u32);

pub struct ReviewBridge {
    git: Arc<dyn VcsAdapter>,
    svn: Arc<dyn VcsAdapter>,
    history: CallThrottle<HistoryKey, CommitPage>,
    relay: AiRelay,
    picker: Box<dyn DirectoryPicker>,
}

impl ReviewBridge {
    pub fn new(
        git: Arc<dyn VcsAdapter>,
        svn: Arc<dyn VcsAdapter>,
        history: CallThrottle<HistoryKey, CommitPage>,
        relay: AiRelay,
        picker: Box<dyn DirectoryPicker>,
    ) -> Self {
        Self {
            git,
            svn,
            history,
            relay,
            picker,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let git = GitAdapter::new(ToolRunner::new(&config.git_bin, config.vcs_timeout));
        let svn = SvnAdapter::new(ToolRunner::new(&config.svn_bin, config.vcs_timeout));
        let policy = CompletionPolicy {
            model: config.ai_model.clone(),
            ..CompletionPolicy::default()
        };
        let relay = AiRelay::new(policy, config.ai_header_timeout)?;

        Ok(Self::new(
            Arc::new(git),
            Arc::new(svn),
            CallThrottle::new(config.history_throttle),
            relay,
            Box::new(ConfiguredDirectory(config.default_repo.clone())),
        ))
    }

    fn adapter(&self, backend: BackendKind) -> Arc<dyn VcsAdapter> {
        match backend {
            BackendKind::Git => self.git.clone(),
            BackendKind::Svn => self.svn.clone(),
        }
    }

    /// Lists one page of history, throttled per window.
    pub async fn list_commits(
        &self,
        backend: BackendKind,
        repo_path: &Path,
        page: u32,
        page_size: u32,
    ) -> Result<CommitPage> {
        let adapter = self.adapter(backend);
        tracing::debug!("History request routed to {} adapter", adapter.kind());
        let repo = repo_path.to_path_buf();
        let key = (backend, repo.clone(), page, page_size);

        self.history
            .call(LIST_COMMITS, key, move || async move {
                adapter.list_commits(&repo, page, page_size).await
            })
            .await
    }

    pub async fn get_diff(
        &self,
        backend: BackendKind,
        repo_path: &Path,
        revision: &str,
    ) -> Result<Vec<DiffEntry>> {
        if revision.trim().is_empty() {
            return Err(ReviewError::InvalidArgument("revision is required".to_string()));
        }
        self.adapter(backend).get_diff(repo_path, revision).await
    }

    pub async fn analyze_stream(
        &self,
        endpoint: &str,
        credential: &str,
        prompt: &str,
    ) -> Result<ChunkStream> {
        if endpoint.trim().is_empty() {
            return Err(ReviewError::InvalidArgument("endpoint is required".to_string()));
        }
        self.relay.analyze(endpoint, credential, prompt).await
    }

    pub fn select_directory(&self) -> Option<PathBuf> {
        self.picker.select_directory()
    }

    pub async fn tool_status(&self, backend: BackendKind) -> ToolStatus {
        self.adapter(backend).probe().await
    }

    pub async fn refresh_tool_status(&self, backend: BackendKind) -> ToolStatus {
        let adapter = self.adapter(backend);
        adapter.invalidate_probe().await;
        adapter.probe().await
    }
}
