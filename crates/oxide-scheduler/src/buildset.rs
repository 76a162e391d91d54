//! Buildset creation on behalf of a scheduler.

use oxide_core::buildset::{NewBuildset, NewSourceStamp, Properties, SCHEDULER_SOURCE};
use oxide_core::ports::BuildsetRepository;
use oxide_core::{BuildsetId, Error, Result, SourceStampId};
use std::sync::Arc;
use tracing::info;

/// Inserts buildsets stamped with the owning scheduler's name and default
/// properties.
#[derive(Clone)]
pub struct BuildsetFactory {
    scheduler_name: String,
    default_properties: Properties,
    buildsets: Arc<dyn BuildsetRepository>,
}

impl BuildsetFactory {
    pub fn new(
        scheduler_name: impl Into<String>,
        default_properties: Properties,
        buildsets: Arc<dyn BuildsetRepository>,
    ) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            default_properties,
            buildsets,
        }
    }

    /// Property list for a new buildset: the implicit `scheduler` property,
    /// then the scheduler defaults, then the caller's properties. Entries
    /// sharing a name are all kept.
    pub fn properties_for(&self, caller: &Properties) -> Properties {
        let mut properties =
            Properties::new().with("scheduler", self.scheduler_name.as_str(), SCHEDULER_SOURCE);
        properties.extend(&self.default_properties);
        properties.extend(caller);
        properties
    }

    /// Atomically insert a buildset with its properties and one build
    /// request per builder.
    pub async fn create(
        &self,
        sourcestampid: SourceStampId,
        reason: &str,
        builder_names: &[String],
        external_idstring: Option<String>,
        properties: &Properties,
    ) -> Result<BuildsetId> {
        let buildset =
            self.new_buildset(sourcestampid, reason, builder_names, external_idstring, properties)?;
        let bsid = self.buildsets.add(&buildset).await?;
        self.log_added(bsid, sourcestampid, reason, builder_names);
        Ok(bsid)
    }

    /// Like [`create`](Self::create), but stores a new source stamp in the
    /// same transaction. A failure leaves neither behind.
    pub async fn create_with_sourcestamp(
        &self,
        sourcestamp: &NewSourceStamp,
        reason: &str,
        builder_names: &[String],
        external_idstring: Option<String>,
        properties: &Properties,
    ) -> Result<BuildsetId> {
        let buildset = self.new_buildset(
            SourceStampId::new(0),
            reason,
            builder_names,
            external_idstring,
            properties,
        )?;
        let (ssid, bsid) = self
            .buildsets
            .add_with_sourcestamp(sourcestamp, &buildset)
            .await?;
        self.log_added(bsid, ssid, reason, builder_names);
        Ok(bsid)
    }

    fn new_buildset(
        &self,
        sourcestampid: SourceStampId,
        reason: &str,
        builder_names: &[String],
        external_idstring: Option<String>,
        properties: &Properties,
    ) -> Result<NewBuildset> {
        if builder_names.is_empty() {
            return Err(Error::Configuration(format!(
                "scheduler {}: buildset needs at least one builder",
                self.scheduler_name
            )));
        }
        Ok(NewBuildset {
            sourcestampid,
            reason: reason.to_string(),
            builder_names: builder_names.to_vec(),
            external_idstring,
            properties: self.properties_for(properties),
        })
    }

    fn log_added(
        &self,
        bsid: BuildsetId,
        sourcestampid: SourceStampId,
        reason: &str,
        builder_names: &[String],
    ) {
        info!(
            scheduler = %self.scheduler_name,
            buildset = %bsid,
            sourcestamp = %sourcestampid,
            reason,
            builders = ?builder_names,
            "Added buildset"
        );
    }
}
