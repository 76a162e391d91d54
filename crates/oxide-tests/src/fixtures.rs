//! Test fixtures for creating sample data.

use async_trait::async_trait;
use oxide_core::change::NewChange;
use oxide_core::{Error, Result};
use oxide_poller::mirror::{FETCHED_TIP, LOCAL_HEAD};
use oxide_poller::{CommitField, Mirror};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Factory for creating test changes.
pub struct ChangeFixture;

impl ChangeFixture {
    /// A change on `master` touching one source file.
    pub fn simple(revision: &str) -> NewChange {
        Self::touching(revision, &["src/lib.rs"])
    }

    pub fn touching(revision: &str, files: &[&str]) -> NewChange {
        NewChange {
            who: "dev <dev@example.com>".to_string(),
            revision: revision.to_string(),
            branch: Some("master".to_string()),
            repository: "git://example.com/repo.git".to_string(),
            project: "repo".to_string(),
            category: None,
            files: files.iter().map(|f| f.to_string()).collect(),
            comments: format!("commit {}", revision),
            when: None,
        }
    }

    pub fn on_branch(revision: &str, branch: &str) -> NewChange {
        NewChange {
            branch: Some(branch.to_string()),
            ..Self::simple(revision)
        }
    }
}

/// One commit on a scripted remote.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitFixture {
    pub revision: String,
    pub author: String,
    pub timestamp: f64,
    pub files: Vec<String>,
    pub message: String,
}

impl CommitFixture {
    pub fn new(revision: &str) -> Self {
        Self {
            revision: revision.to_string(),
            author: "dev@example.com".to_string(),
            timestamp: 1_273_258_009.0,
            files: vec!["src/lib.rs".to_string()],
            message: format!("commit {}", revision),
        }
    }

    pub fn files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn timestamp(mut self, epoch: f64) -> Self {
        self.timestamp = epoch;
        self
    }
}

/// In-memory mirror of a scripted remote branch.
///
/// The remote is a list of commits; the local head and the fetched tip are
/// positions in that list. Individual metadata reads, fetches, and resets
/// can be made to fail.
pub struct ScriptedMirror {
    path: PathBuf,
    remote: Mutex<Vec<CommitFixture>>,
    head: Mutex<usize>,
    fetched: Mutex<usize>,
    cloned: AtomicBool,
    fail_fetch: AtomicBool,
    fail_reset: AtomicBool,
    broken_fields: Mutex<HashSet<(String, CommitField)>>,
}

impl ScriptedMirror {
    /// A remote that already holds `history`; a clone lands on its tip.
    pub fn new(history: Vec<CommitFixture>) -> Self {
        Self {
            path: PathBuf::from("/scripted/mirror"),
            remote: Mutex::new(history),
            head: Mutex::new(0),
            fetched: Mutex::new(0),
            cloned: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_reset: AtomicBool::new(false),
            broken_fields: Mutex::new(HashSet::new()),
        }
    }

    /// Add a commit to the remote branch.
    pub fn push(&self, commit: CommitFixture) {
        lock(&self.remote).push(commit);
    }

    /// Revision the local head points at, if any.
    pub fn head(&self) -> Option<String> {
        let head = *lock(&self.head);
        head.checked_sub(1)
            .map(|i| lock(&self.remote)[i].revision.clone())
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::SeqCst);
    }

    /// Make reading `field` of `revision` fail until cleared.
    pub fn break_field(&self, revision: &str, field: CommitField) {
        lock(&self.broken_fields).insert((revision.to_string(), field));
    }

    pub fn repair_fields(&self) {
        lock(&self.broken_fields).clear();
    }

    fn position(&self, reference: &str) -> Result<usize> {
        match reference {
            LOCAL_HEAD => Ok(*lock(&self.head)),
            FETCHED_TIP => Ok(*lock(&self.fetched)),
            other => Err(Error::Vcs {
                command: format!("git rev-parse {}", other),
                stderr: "unknown revision".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Mirror for ScriptedMirror {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn is_cloned(&self) -> Result<bool> {
        Ok(self.cloned.load(Ordering::SeqCst))
    }

    async fn clone_remote(&self, _remote_url: &str) -> Result<()> {
        let tip = lock(&self.remote).len();
        *lock(&self.head) = tip;
        *lock(&self.fetched) = tip;
        self.cloned.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, remote_url: &str, branch: &str) -> Result<()> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Vcs {
                command: format!("git fetch {} {}", remote_url, branch),
                stderr: "fatal: unable to access remote".to_string(),
            });
        }
        *lock(&self.fetched) = lock(&self.remote).len();
        Ok(())
    }

    async fn list_new_commits(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let (base, tip) = (self.position(base)?, self.position(tip)?);
        let remote = lock(&self.remote);
        Ok(remote
            .get(base..tip)
            .unwrap_or_default()
            .iter()
            .rev()
            .map(|c| c.revision.clone())
            .collect())
    }

    async fn read_commit_field(&self, revision: &str, field: CommitField) -> Result<String> {
        if lock(&self.broken_fields).contains(&(revision.to_string(), field)) {
            return Err(Error::Vcs {
                command: format!("git log -1 {}", revision),
                stderr: format!("cannot read {}", field.as_str()),
            });
        }

        let remote = lock(&self.remote);
        let commit = remote
            .iter()
            .find(|c| c.revision == revision)
            .ok_or_else(|| Error::Vcs {
                command: format!("git log -1 {}", revision),
                stderr: "bad object".to_string(),
            })?;

        Ok(match field {
            CommitField::Timestamp => commit.timestamp.to_string(),
            CommitField::Author => commit.author.clone(),
            CommitField::Files => commit.files.join("\n"),
            CommitField::Message => commit.message.clone(),
        })
    }

    async fn reset_hard_to(&self, reference: &str) -> Result<()> {
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(Error::Vcs {
                command: format!("git reset --hard {}", reference),
                stderr: "index.lock exists".to_string(),
            });
        }
        let target = self.position(reference)?;
        *lock(&self.head) = target;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
