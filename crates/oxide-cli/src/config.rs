//! Daemon configuration.

use oxide_poller::PollerConfig;
use oxide_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Everything the daemon runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// PostgreSQL URL. Falls back to `DATABASE_URL`; without either the
    /// daemon keeps its state in memory.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub pollers: Vec<PollerConfig>,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

impl DaemonConfig {
    /// Load configuration from a YAML file and validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::from_yaml(&contents)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        let mut workdirs = HashSet::new();
        for poller in &self.pollers {
            poller.validate()?;
            if !names.insert(poller.name.as_str()) {
                anyhow::bail!("duplicate poller name {:?}", poller.name);
            }
            if !workdirs.insert(poller.workdir.as_path()) {
                anyhow::bail!(
                    "pollers share workdir {}",
                    poller.workdir.display()
                );
            }
        }

        let mut names = HashSet::new();
        for scheduler in &self.schedulers {
            scheduler.validate()?;
            if !names.insert(scheduler.name.as_str()) {
                anyhow::bail!("duplicate scheduler name {:?}", scheduler.name);
            }
        }
        Ok(())
    }

    /// Configured URL, else `DATABASE_URL` from the environment or `.env`.
    pub fn resolved_database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database_url: postgres://localhost/oxide
log_format: json
pollers:
  - name: main-repo
    repourl: https://example.com/repo.git
    branch: main
    poll_interval_secs: 60
schedulers:
  - name: quick
    builder_names: [linux]
    file_patterns: ["src/**"]
"#;

    #[test]
    fn test_parse_sample() {
        let config = DaemonConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.pollers.len(), 1);
        assert_eq!(config.pollers[0].branch, "main");
        assert_eq!(config.pollers[0].gitbin, "git");
        assert_eq!(config.schedulers[0].builder_names, vec!["linux"]);
        assert_eq!(
            config.resolved_database_url().as_deref(),
            Some("postgres://localhost/oxide")
        );
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = DaemonConfig::from_yaml("{}").unwrap();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.pollers.is_empty());
    }

    #[test]
    fn test_duplicate_scheduler_rejected() {
        let yaml = r#"
schedulers:
  - name: a
    builder_names: [x]
  - name: a
    builder_names: [y]
"#;
        assert!(DaemonConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_shared_workdir_rejected() {
        let yaml = r#"
pollers:
  - name: a
    repourl: https://example.com/a.git
  - name: b
    repourl: https://example.com/b.git
"#;
        assert!(DaemonConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_scheduler_rejected() {
        let yaml = r#"
schedulers:
  - name: a
    builder_names: []
"#;
        assert!(DaemonConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oxide-watch.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.pollers[0].name, "main-repo");
    }
}
