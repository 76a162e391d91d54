//! Error types for Oxide CI.

use crate::ids::{BuildsetId, ChangeId, SourceStampId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // VCS / mirror errors
    #[error("VCS command failed: {command}: {stderr}")]
    Vcs { command: String, stderr: String },

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Could not extract metadata for {revision}: {reason}")]
    MetadataExtraction { revision: String, reason: String },

    #[error("Mirror inconsistent, manual intervention required: {0}")]
    MirrorInconsistent(String),

    #[error("Poller stopped: {0}")]
    PollerStopped(String),

    // Scheduler errors
    #[error("No state for key {key:?} on scheduler {scheduler}")]
    StateKeyMissing { scheduler: String, key: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // Lookup errors
    #[error("Change not found: {0}")]
    ChangeNotFound(ChangeId),

    #[error("Source stamp not found: {0}")]
    SourceStampNotFound(SourceStampId),

    #[error("Buildset not found: {0}")]
    BuildsetNotFound(BuildsetId),

    #[error("Buildset {0} already has results")]
    BuildsetAlreadyComplete(BuildsetId),

    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors that must halt the component that raised them rather than be
    /// retried on the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MirrorInconsistent(_) | Error::PollerStopped(_) | Error::Configuration(_)
        )
    }

    /// True for the missing-state-key error, so callers can tell "never set"
    /// apart from other failures.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Error::StateKeyMissing { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::MirrorInconsistent("reset failed".into()).is_fatal());
        assert!(
            !Error::Vcs {
                command: "git fetch".into(),
                stderr: "timeout".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_missing_key_is_distinct() {
        let err = Error::StateKeyMissing {
            scheduler: "nightly".into(),
            key: "fav_book".into(),
        };
        assert!(err.is_missing_key());
        assert!(!Error::Internal("x".into()).is_missing_key());
    }
}
