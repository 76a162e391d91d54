//! Repository poller: fetch, diff, extract, emit, catch up.

use crate::config::PollerConfig;
use crate::metadata::{CommitInfo, CommitMetadataFetcher};
use crate::mirror::{FETCHED_TIP, LOCAL_HEAD, Mirror};
use chrono::{DateTime, Utc};
use oxide_core::change::NewChange;
use oxide_core::ports::ChangeSink;
use oxide_core::{Error, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Where a poller is in its cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Fetching,
    Diffing,
    ExtractingMetadata(String),
    Emitting,
    CatchingUp,
    /// The last cycle failed before catch-up; the next tick retries.
    Aborted,
    /// Catch-up failed. The mirror needs manual repair.
    Fatal,
}

/// Result of one `poll()` call that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was already running.
    Skipped,
    NoChanges,
    /// Changes emitted and the mirror caught up.
    Emitted(usize),
    /// Fetch, diff, metadata, or emission failed; nothing was caught up.
    Aborted(String),
}

#[derive(Debug)]
struct Status {
    state: PollerState,
    stopped: bool,
    last_poll: Option<DateTime<Utc>>,
    last_change: Option<DateTime<Utc>>,
}

/// Polls one branch of one remote repository into an exclusively owned
/// mirror and emits a change per new commit, oldest first.
pub struct RepositoryPoller {
    config: PollerConfig,
    mirror: Arc<dyn Mirror>,
    fetcher: CommitMetadataFetcher,
    sink: Arc<dyn ChangeSink>,
    cycle: tokio::sync::Mutex<()>,
    status: Mutex<Status>,
}

impl RepositoryPoller {
    pub fn new(config: PollerConfig, mirror: Arc<dyn Mirror>, sink: Arc<dyn ChangeSink>) -> Self {
        let fetcher = CommitMetadataFetcher::new(mirror.clone(), config.usetimestamps);
        Self {
            config,
            mirror,
            fetcher,
            sink,
            cycle: tokio::sync::Mutex::new(()),
            status: Mutex::new(Status {
                state: PollerState::Idle,
                stopped: false,
                last_poll: None,
                last_change: None,
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> PollerState {
        self.status().state.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.status().stopped
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        self.status().last_poll
    }

    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        self.status().last_change
    }

    pub fn describe(&self) -> String {
        let mut text = format!(
            "GitPoller watching the remote git repository {}, branch: {}",
            self.config.repourl, self.config.branch
        );
        if self.is_stopped() {
            text.push_str(" [STOPPED - check log]");
        }
        text
    }

    /// Prepare the mirror, cloning the remote if the directory holds no
    /// repository yet. A stopped poller accepts polls again afterwards.
    pub async fn start(&self) -> Result<()> {
        if !self.mirror.is_cloned().await? {
            info!(
                poller = %self.config.name,
                workdir = %self.mirror.path().display(),
                "Initializing working dir"
            );
            self.mirror.clone_remote(&self.config.repourl).await?;
        }
        {
            let mut status = self.status();
            status.stopped = false;
            status.state = PollerState::Idle;
        }
        info!(poller = %self.config.name, "{}", self.describe());
        Ok(())
    }

    /// Stop accepting polls. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut status = self.status();
        if !status.stopped {
            status.stopped = true;
            info!(poller = %self.config.name, "Poller stopped");
        }
    }

    /// Run one synchronization cycle.
    ///
    /// Only fatal conditions are returned as errors: a catch-up failure, or a
    /// poll on a stopped poller. Everything else is logged and reported as
    /// [`PollOutcome::Aborted`].
    pub async fn poll(&self) -> Result<PollOutcome> {
        if self.is_stopped() {
            return Err(Error::PollerStopped(self.describe()));
        }

        let Ok(_guard) = self.cycle.try_lock() else {
            debug!(poller = %self.config.name, "Poll already in progress, skipping tick");
            return Ok(PollOutcome::Skipped);
        };

        let polled_at = Utc::now();
        self.status().last_poll = Some(polled_at);
        info!(poller = %self.config.name, repourl = %self.config.repourl, "Polling git repo");

        let limit = self.config.cycle_timeout();
        let count = match tokio::time::timeout(limit, self.fetch_and_emit(polled_at)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => return Ok(self.abort(e)),
            Err(_) => {
                return Ok(self.abort(Error::CommandTimeout {
                    command: format!("poll of {}", self.config.repourl),
                    seconds: limit.as_secs(),
                }));
            }
        };

        if count == 0 {
            debug!(poller = %self.config.name, "No changes, no catch-up");
            self.set_state(PollerState::Idle);
            return Ok(PollOutcome::NoChanges);
        }

        self.set_state(PollerState::CatchingUp);
        info!(poller = %self.config.name, count, "Catching up to fetched tip");
        if let Err(e) = self.mirror.reset_hard_to(FETCHED_TIP).await {
            self.set_state(PollerState::Fatal);
            error!(
                poller = %self.config.name,
                workdir = %self.mirror.path().display(),
                error = %e,
                "Catch-up failed, stopping poller; resolve the local repository before restarting"
            );
            self.stop();
            return Err(Error::MirrorInconsistent(format!(
                "{}: {}",
                self.mirror.path().display(),
                e
            )));
        }

        self.set_state(PollerState::Idle);
        Ok(PollOutcome::Emitted(count))
    }

    /// Everything before catch-up. Returns how many changes were emitted.
    async fn fetch_and_emit(&self, polled_at: DateTime<Utc>) -> Result<usize> {
        let commits = self.collect().await?;
        if commits.is_empty() {
            return Ok(0);
        }

        self.set_state(PollerState::Emitting);
        for info in &commits {
            self.sink.add_change(self.new_change(info)).await?;
            self.status().last_change = Some(polled_at);
        }
        Ok(commits.len())
    }

    /// Fetch, diff, and extract metadata for every new commit, oldest first.
    /// Nothing is emitted until every commit has been read.
    async fn collect(&self) -> Result<Vec<CommitInfo>> {
        self.set_state(PollerState::Fetching);
        self.mirror
            .fetch(&self.config.repourl, &self.config.branch)
            .await?;

        self.set_state(PollerState::Diffing);
        let mut revisions = self.mirror.list_new_commits(LOCAL_HEAD, FETCHED_TIP).await?;
        revisions.reverse();

        if !revisions.is_empty() {
            info!(poller = %self.config.name, count = revisions.len(), "Processing new commits");
        }

        let mut commits = Vec::with_capacity(revisions.len());
        for revision in revisions {
            self.set_state(PollerState::ExtractingMetadata(revision.clone()));
            commits.push(self.fetcher.fetch(&revision).await?);
        }
        Ok(commits)
    }

    fn abort(&self, e: Error) -> PollOutcome {
        self.set_state(PollerState::Aborted);
        warn!(poller = %self.config.name, repourl = %self.config.repourl, error = %e, "Repo poll failed");
        PollOutcome::Aborted(e.to_string())
    }

    fn new_change(&self, info: &CommitInfo) -> NewChange {
        NewChange {
            who: info.author.clone(),
            revision: info.revision.clone(),
            branch: Some(self.config.branch.clone()),
            repository: self.config.repourl.clone(),
            project: self.config.project.clone().unwrap_or_default(),
            category: self.config.category.clone(),
            files: info.files.clone(),
            comments: info.message.clone(),
            when: info.timestamp,
        }
    }

    fn set_state(&self, state: PollerState) {
        self.status().state = state;
    }

    fn status(&self) -> std::sync::MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}
