use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReviewError;

/// Path reported for diff output that cannot be attributed to a file.
pub const UNKNOWN_PATH: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "distributed")]
    Git,
    #[serde(alias = "subversion", alias = "centralized")]
    Svn,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Git => "git",
            BackendKind::Svn => "svn",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" | "distributed" => Ok(BackendKind::Git),
            "svn" | "subversion" | "centralized" => Ok(BackendKind::Svn),
            other => Err(ReviewError::InvalidArgument(format!(
                "unknown backend '{}', expected 'git' or 'svn'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: String,
    pub author: String,
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPage {
    pub commits: Vec<CommitRecord>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    /// Records inside this page's window that were dropped as malformed.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl CommitPage {
    pub fn empty(total: usize, page: u32, page_size: u32) -> Self {
        Self {
            commits: Vec::new(),
            total,
            page,
            page_size,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    pub diff_text: String,
}

impl DiffEntry {
    pub fn new(path: impl Into<String>, diff_text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            diff_text: diff_text.into(),
        }
    }

    pub fn unknown(diff_text: impl Into<String>) -> Self {
        Self::new(UNKNOWN_PATH, diff_text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiRequest {
    pub endpoint: String,
    pub credential: String,
    pub prompt: String,
}

/// Result of probing a backend's command-line tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ToolStatus {
    Available { version: String },
    Unavailable { reason: String },
    Unknown { detail: String },
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ToolStatus::Available { .. })
    }
}
