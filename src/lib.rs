//! Paginated commit history and diffs over git and Subversion working
//! copies, plus a streaming relay for chat-completion analysis.

pub mod bridge;
pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod models;
pub mod pagination;
pub mod relay;
pub mod routes;
pub mod svn;
pub mod throttle;
pub mod vcs;

pub use bridge::{ConfiguredDirectory, DirectoryPicker, ReviewBridge};
pub use config::ServiceConfig;
pub use error::ReviewError;
pub use models::{BackendKind, CommitPage, CommitRecord, DiffEntry, ToolStatus};
pub use relay::{AiRelay, ChunkStream, CompletionPolicy};
