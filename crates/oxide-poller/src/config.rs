//! Poller configuration.

use oxide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for one repository poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Poller name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Remote repository to watch.
    pub repourl: String,
    /// Branch to watch.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Local mirror directory, owned exclusively by this poller.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Seconds between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Path to the git executable.
    #[serde(default = "default_gitbin")]
    pub gitbin: String,
    /// Attach commit timestamps to changes.
    #[serde(default = "default_usetimestamps")]
    pub usetimestamps: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    /// Upper bound for any single git command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Upper bound for fetch, diff, metadata, and emission in one poll.
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,
}

fn default_name() -> String {
    "gitpoller".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_workdir() -> PathBuf {
    std::env::temp_dir().join("gitpoller_work")
}

fn default_poll_interval() -> u64 {
    600
}

fn default_gitbin() -> String {
    "git".to_string()
}

fn default_usetimestamps() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    300
}

fn default_cycle_timeout() -> u64 {
    1800
}

impl PollerConfig {
    /// Defaults for everything but the remote.
    pub fn new(repourl: impl Into<String>) -> Self {
        Self {
            name: default_name(),
            repourl: repourl.into(),
            branch: default_branch(),
            workdir: default_workdir(),
            poll_interval_secs: default_poll_interval(),
            gitbin: default_gitbin(),
            usetimestamps: default_usetimestamps(),
            category: None,
            project: None,
            command_timeout_secs: default_command_timeout(),
            cycle_timeout_secs: default_cycle_timeout(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repourl.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "poller {}: repourl must not be empty",
                self.name
            )));
        }
        if self.branch.trim().is_empty() {
            return Err(Error::Configuration(format!(
                "poller {}: branch must not be empty",
                self.name
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration(format!(
                "poller {}: poll_interval_secs must be positive",
                self.name
            )));
        }
        if self.command_timeout_secs == 0 {
            return Err(Error::Configuration(format!(
                "poller {}: command_timeout_secs must be positive",
                self.name
            )));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(Error::Configuration(format!(
                "poller {}: cycle_timeout_secs must be positive",
                self.name
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}
