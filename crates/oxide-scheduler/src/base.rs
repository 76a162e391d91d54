//! Scheduler base: change consumption, persistent state, buildset helpers.

use crate::buildset::BuildsetFactory;
use crate::filter::{ChangeFilter, FileIsImportant, classify};
use async_trait::async_trait;
use oxide_bus::{CHANGES_TOPIC, ChangeBus, ChangeConsumer, Subscription};
use oxide_core::buildset::{NewSourceStamp, Properties};
use oxide_core::change::{Change, most_recent};
use oxide_core::ports::{
    BuildsetRepository, ChangeRepository, SchedulerStateRepository, SourceStampRepository,
};
use oxide_core::{BuildsetId, ChangeId, Error, Result, SchedulerId, SourceStampId};
use serde_json::Value;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

/// Storage and bus handles a scheduler works against.
#[derive(Clone)]
pub struct SchedulerServices {
    pub changes: Arc<dyn ChangeRepository>,
    pub sourcestamps: Arc<dyn SourceStampRepository>,
    pub buildsets: Arc<dyn BuildsetRepository>,
    pub state: Arc<dyn SchedulerStateRepository>,
    pub bus: ChangeBus,
}

/// Receives the changes a scheduler did not ignore.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn got_change(&self, change: &Change, important: bool) -> Result<()>;
}

/// Per-call overrides for buildset creation.
#[derive(Debug, Clone, Default)]
pub struct BuildsetOptions {
    /// Replaces the scheduler's builders when set.
    pub builder_names: Option<Vec<String>>,
    pub properties: Properties,
    pub external_idstring: Option<String>,
}

impl BuildsetOptions {
    pub fn builder_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builder_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn external_idstring(mut self, id: impl Into<String>) -> Self {
        self.external_idstring = Some(id.into());
        self
    }
}

/// Where to build from when no specific changes are requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestSource {
    pub branch: Option<String>,
    pub repository: String,
    pub project: String,
}

/// Shared machinery for concrete schedulers.
pub struct BaseScheduler {
    name: String,
    class_name: String,
    builder_names: Vec<String>,
    services: SchedulerServices,
    factory: BuildsetFactory,
    scheduler_id: Mutex<Option<SchedulerId>>,
    subscription: Mutex<Option<Subscription>>,
}

impl BaseScheduler {
    /// Validates the builder list up front.
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        builder_names: Vec<String>,
        properties: Properties,
        services: SchedulerServices,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Configuration("scheduler name must not be empty".into()));
        }
        validate_builder_names(&name, &builder_names)?;

        let factory = BuildsetFactory::new(name.clone(), properties, services.buildsets.clone());
        Ok(Self {
            name,
            class_name: class_name.into(),
            builder_names,
            services,
            factory,
            scheduler_id: Mutex::new(None),
            subscription: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &SchedulerServices {
        &self.services
    }

    pub fn list_builder_names(&self) -> &[String] {
        &self.builder_names
    }

    /// Resolve this scheduler's storage id.
    pub async fn start(&self) -> Result<SchedulerId> {
        let id = self.scheduler_id().await?;
        info!(scheduler = %self.name, scheduler_id = %id, "Scheduler started");
        Ok(id)
    }

    /// Stop consuming changes. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_consuming_changes();
    }

    pub async fn scheduler_id(&self) -> Result<SchedulerId> {
        if let Some(id) = *self.lock_id() {
            return Ok(id);
        }
        let id = self
            .services
            .state
            .scheduler_id(&self.name, &self.class_name)
            .await?;
        *self.lock_id() = Some(id);
        Ok(id)
    }

    /// Subscribe to new changes, classifying each one before handing it to
    /// `handler`. Ignored changes never reach the handler.
    ///
    /// Fails if this scheduler is already consuming changes.
    pub fn start_consuming_changes(
        &self,
        handler: Weak<dyn ChangeHandler>,
        file_is_important: Option<FileIsImportant>,
        change_filter: Option<ChangeFilter>,
    ) -> Result<()> {
        let mut subscription = self.lock_subscription();
        if subscription.is_some() {
            return Err(Error::Configuration(format!(
                "scheduler {} is already consuming changes",
                self.name
            )));
        }

        let consumer = ClassifyingConsumer {
            scheduler: self.name.clone(),
            change_filter,
            file_is_important: file_is_important.unwrap_or_default(),
            handler,
        };
        *subscription = Some(self.services.bus.subscribe(CHANGES_TOPIC, Arc::new(consumer)));
        debug!(scheduler = %self.name, "Consuming changes");
        Ok(())
    }

    pub fn stop_consuming_changes(&self) {
        if let Some(mut subscription) = self.lock_subscription().take() {
            subscription.unsubscribe();
            debug!(scheduler = %self.name, "Stopped consuming changes");
        }
    }

    pub fn is_consuming_changes(&self) -> bool {
        self.lock_subscription().is_some()
    }

    /// Read persisted state. A key that was never set is a
    /// [`Error::StateKeyMissing`] error.
    pub async fn get_state(&self, key: &str) -> Result<Value> {
        let id = self.scheduler_id().await?;
        self.services
            .state
            .get_state(id, key)
            .await?
            .ok_or_else(|| Error::StateKeyMissing {
                scheduler: self.name.clone(),
                key: key.to_string(),
            })
    }

    /// Read persisted state, falling back to `default` for an unset key.
    pub async fn get_state_or(&self, key: &str, default: Value) -> Result<Value> {
        let id = self.scheduler_id().await?;
        Ok(self
            .services
            .state
            .get_state(id, key)
            .await?
            .unwrap_or(default))
    }

    /// Durably store `value` under `key`, replacing any previous value.
    pub async fn set_state(&self, key: &str, value: Value) -> Result<()> {
        let id = self.scheduler_id().await?;
        self.services.state.set_state(id, key, &value).await
    }

    pub async fn add_buildset_for_source_stamp(
        &self,
        reason: &str,
        sourcestampid: SourceStampId,
        options: BuildsetOptions,
    ) -> Result<BuildsetId> {
        if self.services.sourcestamps.get(sourcestampid).await?.is_none() {
            return Err(Error::SourceStampNotFound(sourcestampid));
        }
        self.create(sourcestampid, reason, options).await
    }

    /// Build from the given changes. Branch, repository, project, and
    /// revision come from the most recent change (highest id); every id is
    /// attached, sorted.
    pub async fn add_buildset_for_changes(
        &self,
        reason: &str,
        changeids: &[ChangeId],
        options: BuildsetOptions,
    ) -> Result<BuildsetId> {
        let mut ids = changeids.to_vec();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Err(Error::Configuration(format!(
                "scheduler {}: buildset for changes needs at least one change",
                self.name
            )));
        }

        let mut changes = Vec::with_capacity(ids.len());
        for id in &ids {
            let change = self
                .services
                .changes
                .get(*id)
                .await?
                .ok_or(Error::ChangeNotFound(*id))?;
            changes.push(change);
        }
        let latest = most_recent(&changes)
            .ok_or_else(|| Error::Internal("no changes after lookup".to_string()))?;

        let sourcestamp = NewSourceStamp {
            branch: latest.branch.clone(),
            revision: Some(latest.revision.clone()),
            repository: latest.repository.clone(),
            project: latest.project.clone(),
            patch: None,
            changeids: ids,
        };
        self.create_with_sourcestamp(&sourcestamp, reason, options).await
    }

    /// Build whatever is current at the given coordinates: a source stamp
    /// with no revision and no changes.
    pub async fn add_buildset_for_latest(
        &self,
        reason: &str,
        source: LatestSource,
        options: BuildsetOptions,
    ) -> Result<BuildsetId> {
        let sourcestamp = NewSourceStamp {
            branch: source.branch,
            revision: None,
            repository: source.repository,
            project: source.project,
            patch: None,
            changeids: vec![],
        };
        self.create_with_sourcestamp(&sourcestamp, reason, options).await
    }

    async fn create(
        &self,
        ssid: SourceStampId,
        reason: &str,
        options: BuildsetOptions,
    ) -> Result<BuildsetId> {
        let builder_names = self.builders_for(options.builder_names)?;
        self.factory
            .create(
                ssid,
                reason,
                &builder_names,
                options.external_idstring,
                &options.properties,
            )
            .await
    }

    /// The source stamp and buildset are stored together or not at all.
    async fn create_with_sourcestamp(
        &self,
        sourcestamp: &NewSourceStamp,
        reason: &str,
        options: BuildsetOptions,
    ) -> Result<BuildsetId> {
        let builder_names = self.builders_for(options.builder_names)?;
        self.factory
            .create_with_sourcestamp(
                sourcestamp,
                reason,
                &builder_names,
                options.external_idstring,
                &options.properties,
            )
            .await
    }

    fn builders_for(&self, requested: Option<Vec<String>>) -> Result<Vec<String>> {
        match requested {
            Some(names) => {
                validate_builder_names(&self.name, &names)?;
                Ok(names)
            }
            None => Ok(self.builder_names.clone()),
        }
    }

    fn lock_id(&self) -> std::sync::MutexGuard<'_, Option<SchedulerId>> {
        self.scheduler_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn validate_builder_names(scheduler: &str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(Error::Configuration(format!(
            "scheduler {}: builder_names must not be empty",
            scheduler
        )));
    }
    if names.iter().any(|n| n.trim().is_empty()) {
        return Err(Error::Configuration(format!(
            "scheduler {}: builder names must not be blank",
            scheduler
        )));
    }
    Ok(())
}

struct ClassifyingConsumer {
    scheduler: String,
    change_filter: Option<ChangeFilter>,
    file_is_important: FileIsImportant,
    handler: Weak<dyn ChangeHandler>,
}

#[async_trait]
impl ChangeConsumer for ClassifyingConsumer {
    async fn on_change(&self, change: &Change) -> Result<()> {
        let classification = classify(
            &self.scheduler,
            change,
            self.change_filter.as_ref(),
            &self.file_is_important,
        );
        let Some(important) = classification.importance() else {
            return Ok(());
        };
        let Some(handler) = self.handler.upgrade() else {
            debug!(scheduler = %self.scheduler, "Scheduler dropped, skipping change");
            return Ok(());
        };
        handler.got_change(change, important).await
    }
}
