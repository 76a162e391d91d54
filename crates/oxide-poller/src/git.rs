//! Mirror backed by the git command line.

use crate::config::PollerConfig;
use crate::mirror::{CommitField, Mirror};
use async_trait::async_trait;
use oxide_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

/// A git working copy driven through `gitbin`.
pub struct GitMirror {
    gitbin: String,
    workdir: PathBuf,
    command_timeout: Duration,
}

impl GitMirror {
    pub fn new(
        gitbin: impl Into<String>,
        workdir: impl Into<PathBuf>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            gitbin: gitbin.into(),
            workdir: workdir.into(),
            command_timeout,
        }
    }

    pub fn from_config(config: &PollerConfig) -> Self {
        Self::new(
            config.gitbin.clone(),
            config.workdir.clone(),
            config.command_timeout(),
        )
    }

    /// Arguments for reading one metadata field of `revision`.
    pub fn field_args(revision: &str, field: CommitField) -> Vec<String> {
        match field {
            CommitField::Timestamp => strings(&["log", revision, "--no-walk", "--format=%ct"]),
            CommitField::Author => strings(&["log", revision, "--no-walk", "--format=%aE"]),
            CommitField::Files => {
                strings(&["log", revision, "--name-only", "--no-walk", "--format=%n"])
            }
            CommitField::Message => strings(&["log", revision, "--no-walk", "--format=%s%n%b"]),
        }
    }

    fn describe_command(&self, args: &[String]) -> String {
        format!("{} {}", self.gitbin, args.join(" "))
    }

    /// Run git in `cwd`, bounded by the command timeout. The child is killed
    /// if the deadline passes.
    async fn run(&self, args: &[String], cwd: &Path) -> Result<Output> {
        let command = self.describe_command(args);
        debug!(command = %command, cwd = %cwd.display(), "Running git");

        let child = Command::new(&self.gitbin)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Vcs {
                command: command.clone(),
                stderr: format!("failed to spawn: {}", e),
            })?;

        match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::Vcs {
                command,
                stderr: format!("failed to wait: {}", e),
            }),
            Err(_) => {
                warn!(
                    command = %command,
                    timeout_secs = self.command_timeout.as_secs(),
                    "Git command timed out, killing process"
                );
                Err(Error::CommandTimeout {
                    command,
                    seconds: self.command_timeout.as_secs(),
                })
            }
        }
    }

    /// Run git in the mirror and return stdout, failing on a non-zero exit.
    async fn output(&self, args: &[String]) -> Result<String> {
        let output = self.run(args, &self.workdir).await?;
        if !output.status.success() {
            return Err(Error::Vcs {
                command: self.describe_command(args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

#[async_trait]
impl Mirror for GitMirror {
    fn path(&self) -> &Path {
        &self.workdir
    }

    async fn is_cloned(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.workdir.join(".git")).await?)
    }

    async fn clone_remote(&self, remote_url: &str) -> Result<()> {
        if !tokio::fs::try_exists(&self.workdir).await? {
            info!(workdir = %self.workdir.display(), "Creating working dir");
            tokio::fs::create_dir_all(&self.workdir).await?;
        }

        info!(repourl = %remote_url, workdir = %self.workdir.display(), "Initializing working dir");
        let args = strings(&["clone", remote_url, "."]);
        let output = self.run(&args, &self.workdir).await?;
        if !output.status.success() {
            return Err(Error::Vcs {
                command: self.describe_command(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&self, remote_url: &str, branch: &str) -> Result<()> {
        let args = strings(&["fetch", remote_url, branch]);
        let output = self.run(&args, &self.workdir).await?;

        // git reports progress on stderr; only the exit status matters.
        if !output.status.success() {
            return Err(Error::Vcs {
                command: self.describe_command(&args),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn list_new_commits(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let range = format!("{}..{}", base, tip);
        let stdout = self.output(&strings(&["log", &range, "--format=%H"])).await?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    async fn read_commit_field(&self, revision: &str, field: CommitField) -> Result<String> {
        self.output(&Self::field_args(revision, field)).await
    }

    async fn reset_hard_to(&self, reference: &str) -> Result<()> {
        self.output(&strings(&["reset", "--hard", reference])).await?;
        Ok(())
    }
}
