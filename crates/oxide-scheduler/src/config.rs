//! Scheduler configuration.

use crate::filter::{ChangeFilter, ChangeFilterConfig, FileIsImportant};
use oxide_core::buildset::{Properties, SCHEDULER_SOURCE};
use oxide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration for one scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Unique scheduler name.
    pub name: String,
    /// Builders that receive a build request for every buildset.
    pub builder_names: Vec<String>,
    /// Default properties attached to every buildset.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub change_filter: Option<ChangeFilterConfig>,
    /// Changes touching none of these paths are unimportant.
    #[serde(default)]
    pub file_patterns: Option<Vec<String>>,
}

impl SchedulerConfig {
    pub fn new<I, S>(name: impl Into<String>, builder_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            builder_names: builder_names.into_iter().map(Into::into).collect(),
            properties: BTreeMap::new(),
            change_filter: None,
            file_patterns: None,
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without storage: names,
    /// builders, filter regexes, and file patterns.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("scheduler name must not be empty".into()));
        }
        if self.builder_names.is_empty() {
            return Err(Error::Configuration(format!(
                "scheduler {}: builder_names must not be empty",
                self.name
            )));
        }
        self.change_filter()?;
        self.file_is_important()?;
        Ok(())
    }

    pub fn default_properties(&self) -> Properties {
        let mut properties = Properties::new();
        for (name, value) in &self.properties {
            properties.set(name.clone(), value.clone(), SCHEDULER_SOURCE);
        }
        properties
    }

    pub fn change_filter(&self) -> Result<Option<ChangeFilter>> {
        self.change_filter
            .as_ref()
            .map(ChangeFilter::from_config)
            .transpose()
    }

    pub fn file_is_important(&self) -> Result<Option<FileIsImportant>> {
        self.file_patterns
            .as_ref()
            .map(|patterns| FileIsImportant::globs(patterns.iter().cloned()))
            .transpose()
    }
}
