//! Change filters and importance predicates.

use oxide_bus::panic_message;
use oxide_core::change::Change;
use oxide_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// What a scheduler should do with a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Important,
    Unimportant,
    /// Rejected by the change filter, or the importance check failed.
    Ignored,
}

impl Classification {
    /// `Some(important)` for changes the scheduler should see.
    pub fn importance(&self) -> Option<bool> {
        match self {
            Classification::Important => Some(true),
            Classification::Unimportant => Some(false),
            Classification::Ignored => None,
        }
    }
}

/// Matches one change attribute.
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    Exact(String),
    OneOf(Vec<String>),
    Regex(Regex),
}

impl ValueMatcher {
    pub fn exact(value: impl Into<String>) -> Self {
        ValueMatcher::Exact(value.into())
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueMatcher::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Compile `pattern`. The pattern must match the whole value.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(&format!("^(?:{})$", pattern))
            .map(ValueMatcher::Regex)
            .map_err(|e| Error::Configuration(format!("invalid filter regex {:?}: {}", pattern, e)))
    }

    /// An unset attribute never matches.
    pub fn matches(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            ValueMatcher::Exact(expected) => expected == value,
            ValueMatcher::OneOf(values) => values.iter().any(|v| v == value),
            ValueMatcher::Regex(re) => re.is_match(value),
        }
    }
}

/// Serialized form of a [`ValueMatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatcherConfig {
    Exact(String),
    OneOf(Vec<String>),
    Regex { regex: String },
}

impl MatcherConfig {
    pub fn compile(&self) -> Result<ValueMatcher> {
        match self {
            MatcherConfig::Exact(v) => Ok(ValueMatcher::exact(v.clone())),
            MatcherConfig::OneOf(vs) => Ok(ValueMatcher::one_of(vs.clone())),
            MatcherConfig::Regex { regex } => ValueMatcher::regex(regex),
        }
    }
}

/// Serialized form of a [`ChangeFilter`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilterConfig {
    #[serde(default)]
    pub branch: Option<MatcherConfig>,
    #[serde(default)]
    pub repository: Option<MatcherConfig>,
    #[serde(default)]
    pub project: Option<MatcherConfig>,
    #[serde(default)]
    pub category: Option<MatcherConfig>,
}

/// Accepts changes whose attributes all satisfy the configured matchers.
/// Attributes without a matcher are not checked.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    branch: Option<ValueMatcher>,
    repository: Option<ValueMatcher>,
    project: Option<ValueMatcher>,
    category: Option<ValueMatcher>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ChangeFilterConfig) -> Result<Self> {
        let compile = |m: &Option<MatcherConfig>| m.as_ref().map(MatcherConfig::compile).transpose();
        Ok(Self {
            branch: compile(&config.branch)?,
            repository: compile(&config.repository)?,
            project: compile(&config.project)?,
            category: compile(&config.category)?,
        })
    }

    pub fn branch(mut self, matcher: ValueMatcher) -> Self {
        self.branch = Some(matcher);
        self
    }

    pub fn repository(mut self, matcher: ValueMatcher) -> Self {
        self.repository = Some(matcher);
        self
    }

    pub fn project(mut self, matcher: ValueMatcher) -> Self {
        self.project = Some(matcher);
        self
    }

    pub fn category(mut self, matcher: ValueMatcher) -> Self {
        self.category = Some(matcher);
        self
    }

    pub fn filter_change(&self, change: &Change) -> bool {
        let check = |matcher: &Option<ValueMatcher>, value: Option<&str>| {
            matcher.as_ref().is_none_or(|m| m.matches(value))
        };
        check(&self.branch, change.branch.as_deref())
            && check(&self.repository, Some(change.repository.as_str()))
            && check(&self.project, Some(change.project.as_str()))
            && check(&self.category, change.category.as_deref())
    }
}

pub type ImportancePredicate = Arc<dyn Fn(&Change) -> Result<bool> + Send + Sync>;

/// Decides whether an accepted change is important.
#[derive(Clone, Default)]
pub enum FileIsImportant {
    #[default]
    Always,
    /// Important if any touched file matches any pattern.
    Globs(Vec<String>),
    Predicate(ImportancePredicate),
}

impl FileIsImportant {
    pub fn globs<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        if patterns.is_empty() {
            return Err(Error::Configuration(
                "file pattern list must not be empty".to_string(),
            ));
        }
        if let Some(bad) = patterns.iter().find(|p| p.trim().is_empty()) {
            return Err(Error::Configuration(format!("invalid file pattern {:?}", bad)));
        }
        Ok(FileIsImportant::Globs(patterns))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Change) -> Result<bool> + Send + Sync + 'static,
    {
        FileIsImportant::Predicate(Arc::new(f))
    }

    /// Evaluate against `change`. A panicking predicate is reported as an
    /// error.
    pub fn evaluate(&self, change: &Change) -> Result<bool> {
        match self {
            FileIsImportant::Always => Ok(true),
            FileIsImportant::Globs(patterns) => Ok(change
                .files
                .iter()
                .any(|file| patterns.iter().any(|p| glob_match(p, file)))),
            FileIsImportant::Predicate(f) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| f(change))).unwrap_or_else(|panic| {
                    Err(Error::Internal(format!(
                        "importance predicate panicked: {}",
                        panic_message(&*panic)
                    )))
                })
            }
        }
    }
}

impl std::fmt::Debug for FileIsImportant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileIsImportant::Always => f.write_str("Always"),
            FileIsImportant::Globs(p) => f.debug_tuple("Globs").field(p).finish(),
            FileIsImportant::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Classify a change for one scheduler. Never fails: a broken importance
/// check is logged and the change is ignored.
pub fn classify(
    scheduler: &str,
    change: &Change,
    change_filter: Option<&ChangeFilter>,
    file_is_important: &FileIsImportant,
) -> Classification {
    if let Some(filter) = change_filter {
        if !filter.filter_change(change) {
            debug!(scheduler, changeid = %change.changeid, "Change rejected by filter");
            return Classification::Ignored;
        }
    }

    match file_is_important.evaluate(change) {
        Ok(true) => Classification::Important,
        Ok(false) => Classification::Unimportant,
        Err(e) => {
            error!(
                scheduler,
                changeid = %change.changeid,
                error = %e,
                "Importance check failed, ignoring change"
            );
            Classification::Ignored
        }
    }
}

/// Path glob: `*` and `?` stay within one path segment, `**` spans
/// segments.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text == prefix || text.starts_with(&format!("{}/", prefix));
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some('*') if pattern.get(1) == Some(&'*') => {
            let rest = &pattern[2..];
            // `**/` also matches zero directories.
            if rest.first() == Some(&'/') && match_from(&rest[1..], text) {
                return true;
            }
            (0..=text.len()).any(|i| match_from(rest, &text[i..]))
        }
        Some('*') => {
            let rest = &pattern[1..];
            for i in 0..=text.len() {
                if match_from(rest, &text[i..]) {
                    return true;
                }
                if text.get(i) == Some(&'/') {
                    break;
                }
            }
            false
        }
        Some('?') => {
            matches!(text.first(), Some(c) if *c != '/') && match_from(&pattern[1..], &text[1..])
        }
        Some(p) => text.first() == Some(p) && match_from(&pattern[1..], &text[1..]),
    }
}
