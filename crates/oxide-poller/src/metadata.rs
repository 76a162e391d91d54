//! Commit metadata extraction.

use crate::mirror::{CommitField, Mirror};
use chrono::{DateTime, Utc};
use oxide_core::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Metadata for one commit. Built fresh for every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub revision: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub author: String,
    pub files: Vec<String>,
    pub message: String,
}

/// Reads author, timestamp, files, and message for a commit from the mirror.
///
/// The four queries run concurrently and all must succeed. Nothing is cached.
#[derive(Clone)]
pub struct CommitMetadataFetcher {
    mirror: Arc<dyn Mirror>,
    usetimestamps: bool,
}

impl CommitMetadataFetcher {
    pub fn new(mirror: Arc<dyn Mirror>, usetimestamps: bool) -> Self {
        Self {
            mirror,
            usetimestamps,
        }
    }

    pub async fn fetch(&self, revision: &str) -> Result<CommitInfo> {
        let (timestamp, author, files, message) = tokio::try_join!(
            self.timestamp(revision),
            self.author(revision),
            self.files(revision),
            self.message(revision),
        )?;

        debug!(revision, author = %author, files = files.len(), "Read commit metadata");

        Ok(CommitInfo {
            revision: revision.to_string(),
            timestamp,
            author,
            files,
            message,
        })
    }

    async fn timestamp(&self, revision: &str) -> Result<Option<DateTime<Utc>>> {
        if !self.usetimestamps {
            return Ok(None);
        }
        let raw = self
            .mirror
            .read_commit_field(revision, CommitField::Timestamp)
            .await?;
        parse_timestamp(revision, &raw).map(Some)
    }

    async fn author(&self, revision: &str) -> Result<String> {
        let raw = self
            .mirror
            .read_commit_field(revision, CommitField::Author)
            .await?;
        non_empty(revision, CommitField::Author, &raw)
    }

    async fn files(&self, revision: &str) -> Result<Vec<String>> {
        let raw = self
            .mirror
            .read_commit_field(revision, CommitField::Files)
            .await?;
        Ok(split_files(&raw))
    }

    async fn message(&self, revision: &str) -> Result<String> {
        let raw = self
            .mirror
            .read_commit_field(revision, CommitField::Message)
            .await?;
        non_empty(revision, CommitField::Message, &raw)
    }
}

/// Parse a unix epoch, possibly fractional.
pub fn parse_timestamp(revision: &str, raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    let invalid = || Error::MetadataExtraction {
        revision: revision.to_string(),
        reason: format!("could not convert {:?} to a timestamp", trimmed),
    };

    let epoch: f64 = trimmed.parse().map_err(|_| invalid())?;
    if !epoch.is_finite() {
        return Err(invalid());
    }

    let secs = epoch.floor();
    let nanos = ((epoch - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).ok_or_else(invalid)
}

fn non_empty(revision: &str, field: CommitField, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::MetadataExtraction {
            revision: revision.to_string(),
            reason: format!("empty {}", field.as_str()),
        });
    }
    Ok(trimmed.to_string())
}

fn split_files(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
