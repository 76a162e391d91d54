//! Repository polling for Oxide CI.
//!
//! A [`RepositoryPoller`] keeps a local mirror of one remote branch, turns
//! every newly fetched commit into a change, and only then advances the
//! mirror. [`PollingService`] drives it on an interval.

pub mod config;
pub mod git;
pub mod metadata;
pub mod mirror;
pub mod poller;
pub mod service;

pub use config::PollerConfig;
pub use git::GitMirror;
pub use metadata::{CommitInfo, CommitMetadataFetcher};
pub use mirror::{CommitField, Mirror};
pub use poller::{PollOutcome, PollerState, RepositoryPoller};
pub use service::PollingService;
