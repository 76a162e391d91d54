//! Persist-then-publish change sink.

use async_trait::async_trait;
use oxide_core::Result;
use oxide_core::change::{Change, NewChange};
use oxide_core::ports::{ChangeRepository, ChangeSink};
use std::sync::Arc;
use tracing::info;

use crate::bus::ChangeBus;

/// Topic every change source publishes on.
pub const CHANGES_TOPIC: &str = "changes";

/// Stores each incoming change, then announces it on the bus.
///
/// A storage failure is returned to the change source; consumer failures
/// never are.
#[derive(Clone)]
pub struct ChangeDispatcher {
    changes: Arc<dyn ChangeRepository>,
    bus: ChangeBus,
}

impl ChangeDispatcher {
    pub fn new(changes: Arc<dyn ChangeRepository>, bus: ChangeBus) -> Self {
        Self { changes, bus }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }
}

#[async_trait]
impl ChangeSink for ChangeDispatcher {
    async fn add_change(&self, change: NewChange) -> Result<Change> {
        let stored = self.changes.add(&change).await?;

        info!(
            changeid = %stored.changeid,
            revision = %stored.revision,
            who = %stored.who,
            "Added change"
        );

        self.bus.publish(CHANGES_TOPIC, &stored).await;
        Ok(stored)
    }
}
