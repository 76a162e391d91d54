//! Normalized commit events.

use crate::ids::ChangeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A change as observed by a change source, before storage has assigned it
/// an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChange {
    pub who: String,
    pub revision: String,
    pub branch: Option<String>,
    pub repository: String,
    pub project: String,
    pub category: Option<String>,
    pub files: Vec<String>,
    pub comments: String,
    /// Commit time. `None` when the source is configured to ignore timestamps.
    pub when: Option<DateTime<Utc>>,
}

/// An immutable, persisted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub changeid: ChangeId,
    pub who: String,
    pub revision: String,
    pub branch: Option<String>,
    pub repository: String,
    pub project: String,
    pub category: Option<String>,
    pub files: Vec<String>,
    pub comments: String,
    pub when: Option<DateTime<Utc>>,
}

impl Change {
    /// Attach a storage-assigned id to a new change.
    pub fn from_new(changeid: ChangeId, change: NewChange) -> Self {
        Self {
            changeid,
            who: change.who,
            revision: change.revision,
            branch: change.branch,
            repository: change.repository,
            project: change.project,
            category: change.category,
            files: change.files,
            comments: change.comments,
            when: change.when,
        }
    }
}

/// Pick the most recently created change: the one with the highest id.
pub fn most_recent(changes: &[Change]) -> Option<&Change> {
    changes.iter().max_by_key(|c| c.changeid)
}
