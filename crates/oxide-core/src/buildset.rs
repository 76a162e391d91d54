//! Source stamps, properties, and buildsets.

use crate::ids::{BuildRequestId, BuildsetId, ChangeId, SourceStampId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Property source recorded for properties a scheduler attaches itself.
pub const SCHEDULER_SOURCE: &str = "Scheduler";

/// A source stamp that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSourceStamp {
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub repository: String,
    pub project: String,
    pub patch: Option<Patch>,
    /// Sorted ascending.
    pub changeids: Vec<ChangeId>,
}

/// A resolved description of what to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    pub id: SourceStampId,
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub repository: String,
    pub project: String,
    pub patch: Option<Patch>,
    pub changeids: Vec<ChangeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub level: i32,
    pub body: String,
    pub subdir: Option<String>,
}

/// A single `(name, value, source)` property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: serde_json::Value,
    pub source: String,
}

/// An ordered property list.
///
/// Entries keep insertion order and are never collapsed by name: merging two
/// lists appends, so an implicit property and a caller property with the same
/// name both survive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a property.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        source: impl Into<String>,
    ) {
        self.0.push(Property {
            name: name.into(),
            value: value.into(),
            source: source.into(),
        });
    }

    /// Builder-style `set`.
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        source: impl Into<String>,
    ) -> Self {
        self.set(name, value, source);
        self
    }

    /// Append every entry of `other` after the existing ones.
    pub fn extend(&mut self, other: &Properties) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Last value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.iter().rev().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as `(name, (value, source))` tuples, mostly for assertions.
    pub fn as_tuples(&self) -> Vec<(String, (serde_json::Value, String))> {
        self.0
            .iter()
            .map(|p| (p.name.clone(), (p.value.clone(), p.source.clone())))
            .collect()
    }
}

impl FromIterator<Property> for Properties {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything needed to insert a buildset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBuildset {
    pub sourcestampid: SourceStampId,
    pub reason: String,
    pub builder_names: Vec<String>,
    pub external_idstring: Option<String>,
    pub properties: Properties,
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Buildset {
    pub id: BuildsetId,
    pub sourcestampid: SourceStampId,
    pub reason: String,
    pub builder_names: Vec<String>,
    pub external_idstring: Option<String>,
    pub properties: Properties,
    pub submitted_at: DateTime<Utc>,
    pub complete: bool,
    /// `None` until the execution subsystem reports.
    pub results: Option<BuildResult>,
}

/// A pending request for one builder to build one buildset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub id: BuildRequestId,
    pub buildsetid: BuildsetId,
    pub builder_name: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildResult {
    Success,
    Warnings,
    Failure,
    Skipped,
    Exception,
    Retry,
    Cancelled,
}

impl BuildResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "success",
            BuildResult::Warnings => "warnings",
            BuildResult::Failure => "failure",
            BuildResult::Skipped => "skipped",
            BuildResult::Exception => "exception",
            BuildResult::Retry => "retry",
            BuildResult::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(BuildResult::Success),
            "warnings" => Some(BuildResult::Warnings),
            "failure" => Some(BuildResult::Failure),
            "skipped" => Some(BuildResult::Skipped),
            "exception" => Some(BuildResult::Exception),
            "retry" => Some(BuildResult::Retry),
            "cancelled" => Some(BuildResult::Cancelled),
            _ => None,
        }
    }
}
