//! Scheduler that builds as soon as an important change arrives.

use crate::base::{BaseScheduler, BuildsetOptions, ChangeHandler, SchedulerServices};
use crate::config::SchedulerConfig;
use crate::filter::{ChangeFilter, FileIsImportant};
use async_trait::async_trait;
use oxide_core::change::Change;
use oxide_core::{ChangeId, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// State key holding ids of changes seen since the last buildset.
pub const PENDING_CHANGEIDS: &str = "pending_changeids";

/// Reason recorded on buildsets this scheduler creates.
pub const REASON: &str = "scheduler";

/// Builds every important change immediately, together with any
/// unimportant changes that arrived before it.
pub struct ImmediateScheduler {
    base: BaseScheduler,
    file_is_important: Option<FileIsImportant>,
    change_filter: Option<ChangeFilter>,
    pending: Mutex<()>,
}

impl ImmediateScheduler {
    pub const CLASS_NAME: &'static str = "ImmediateScheduler";

    pub fn new(
        base: BaseScheduler,
        file_is_important: Option<FileIsImportant>,
        change_filter: Option<ChangeFilter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base,
            file_is_important,
            change_filter,
            pending: Mutex::new(()),
        })
    }

    pub fn from_config(config: &SchedulerConfig, services: SchedulerServices) -> Result<Arc<Self>> {
        config.validate()?;
        let base = BaseScheduler::new(
            config.name.clone(),
            Self::CLASS_NAME,
            config.builder_names.clone(),
            config.default_properties(),
            services,
        )?;
        Ok(Self::new(
            base,
            config.file_is_important()?,
            config.change_filter()?,
        ))
    }

    pub fn base(&self) -> &BaseScheduler {
        &self.base
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.base.start().await?;
        let handler: Arc<dyn ChangeHandler> = self.clone();
        self.base.start_consuming_changes(
            Arc::downgrade(&handler),
            self.file_is_important.clone(),
            self.change_filter.clone(),
        )
    }

    pub fn stop(&self) {
        self.base.stop();
    }

    /// Changes classified since the last buildset.
    pub async fn pending_changeids(&self) -> Result<Vec<ChangeId>> {
        let raw = self
            .base
            .get_state_or(PENDING_CHANGEIDS, serde_json::json!([]))
            .await?;
        Ok(serde_json::from_value(raw)?)
    }
}

#[async_trait]
impl ChangeHandler for ImmediateScheduler {
    async fn got_change(&self, change: &Change, important: bool) -> Result<()> {
        let _guard = self.pending.lock().await;

        let mut pending = self.pending_changeids().await?;
        pending.push(change.changeid);
        self.base
            .set_state(PENDING_CHANGEIDS, serde_json::to_value(&pending)?)
            .await?;

        if !important {
            debug!(
                scheduler = %self.base.name(),
                changeid = %change.changeid,
                "Holding unimportant change"
            );
            return Ok(());
        }

        // Pending ids stay stored until a buildset covers them.
        let bsid = self
            .base
            .add_buildset_for_changes(REASON, &pending, BuildsetOptions::default())
            .await?;
        self.base
            .set_state(PENDING_CHANGEIDS, serde_json::json!([]))
            .await?;

        info!(
            scheduler = %self.base.name(),
            buildset = %bsid,
            changes = pending.len(),
            "Triggered build for change"
        );
        Ok(())
    }
}
