//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the change/scheduling domain and
//! its storage adapters.

use crate::buildset::{BuildRequest, BuildResult, Buildset, NewBuildset, NewSourceStamp, SourceStamp};
use crate::change::{Change, NewChange};
use crate::ids::*;
use crate::Result;
use async_trait::async_trait;

/// Repository for changes.
#[async_trait]
pub trait ChangeRepository: Send + Sync {
    /// Persist a change, assigning it the next id.
    async fn add(&self, change: &NewChange) -> Result<Change>;

    /// Get a change by ID.
    async fn get(&self, id: ChangeId) -> Result<Option<Change>>;

    /// Most recently added changes, newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<Change>>;
}

/// Repository for source stamps.
#[async_trait]
pub trait SourceStampRepository: Send + Sync {
    async fn add(&self, sourcestamp: &NewSourceStamp) -> Result<SourceStampId>;

    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>>;
}

/// Repository for buildsets and their build requests.
#[async_trait]
pub trait BuildsetRepository: Send + Sync {
    /// Insert a buildset, its properties, and one build request per builder
    /// in a single transaction.
    async fn add(&self, buildset: &NewBuildset) -> Result<BuildsetId>;

    /// Insert `sourcestamp` and a buildset over it in a single transaction.
    /// The buildset's `sourcestampid` is replaced by the new stamp's id.
    /// On failure neither row exists.
    async fn add_with_sourcestamp(
        &self,
        sourcestamp: &NewSourceStamp,
        buildset: &NewBuildset,
    ) -> Result<(SourceStampId, BuildsetId)>;

    async fn get(&self, id: BuildsetId) -> Result<Option<Buildset>>;

    /// Pending build requests for a buildset, in builder order.
    async fn build_requests(&self, id: BuildsetId) -> Result<Vec<BuildRequest>>;

    /// Record the result reported by the execution subsystem. Fails with
    /// `BuildsetAlreadyComplete` on a second call.
    async fn complete(&self, id: BuildsetId, results: BuildResult) -> Result<()>;
}

/// Durable key/value state, namespaced per scheduler.
#[async_trait]
pub trait SchedulerStateRepository: Send + Sync {
    /// Resolve (creating on first use) the id for a scheduler.
    async fn scheduler_id(&self, name: &str, class_name: &str) -> Result<SchedulerId>;

    async fn get_state(&self, id: SchedulerId, key: &str) -> Result<Option<serde_json::Value>>;

    /// Overwrites any previous value.
    async fn set_state(&self, id: SchedulerId, key: &str, value: &serde_json::Value) -> Result<()>;
}

/// Destination for changes observed by a change source.
#[async_trait]
pub trait ChangeSink: Send + Sync {
    async fn add_change(&self, change: NewChange) -> Result<Change>;
}
