//! Local mirror port.

use async_trait::async_trait;
use oxide_core::Result;
use std::path::Path;

/// The mirror's own head.
pub const LOCAL_HEAD: &str = "HEAD";
/// Tip recorded by the last fetch.
pub const FETCHED_TIP: &str = "FETCH_HEAD";

/// One piece of commit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitField {
    /// Commit time as a unix epoch.
    Timestamp,
    /// Author email.
    Author,
    /// Touched paths, whitespace separated.
    Files,
    /// Subject and body.
    Message,
}

impl CommitField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitField::Timestamp => "timestamp",
            CommitField::Author => "author",
            CommitField::Files => "files",
            CommitField::Message => "message",
        }
    }
}

/// Operations a poller needs from its local replica of a remote repository.
///
/// Every method except `fetch` is read-only with respect to the remote, and
/// only `clone_remote` and `reset_hard_to` move the local head.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Directory holding the mirror.
    fn path(&self) -> &Path;

    /// Whether the directory already holds a repository.
    async fn is_cloned(&self) -> Result<bool>;

    /// Create the directory if needed and clone `remote_url` into it.
    async fn clone_remote(&self, remote_url: &str) -> Result<()>;

    /// Fetch `branch` from `remote_url`. Progress output is not an error.
    async fn fetch(&self, remote_url: &str, branch: &str) -> Result<()>;

    /// Commits reachable from `tip` but not from `base`, newest first.
    async fn list_new_commits(&self, base: &str, tip: &str) -> Result<Vec<String>>;

    /// Raw text of one metadata field.
    async fn read_commit_field(&self, revision: &str, field: CommitField) -> Result<String>;

    /// Force the local head to `reference`.
    async fn reset_hard_to(&self, reference: &str) -> Result<()>;
}
