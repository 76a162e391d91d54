//! Test contexts: a PostgreSQL-backed one and an in-memory pipeline.

use crate::containers::PostgresContainer;
use crate::fixtures::{CommitFixture, ScriptedMirror};
use oxide_bus::{ChangeBus, ChangeDispatcher};
use oxide_db::{Database, MemoryDatabase};
use oxide_poller::{PollerConfig, RepositoryPoller};
use oxide_scheduler::{ImmediateScheduler, SchedulerConfig, SchedulerServices};
use std::sync::Arc;

/// Test context with PostgreSQL running and migrated.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    /// Get database connection string.
    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }

    pub fn services(&self, bus: ChangeBus) -> SchedulerServices {
        SchedulerServices {
            changes: self.db.changes(),
            sourcestamps: self.db.sourcestamps(),
            buildsets: self.db.buildsets(),
            state: self.db.scheduler_state(),
            bus,
        }
    }
}

pub const REPO_URL: &str = "git://example.com/repo.git";

/// A scripted remote, its poller, and a set of started schedulers, all over
/// one in-memory database.
pub struct Pipeline {
    pub db: MemoryDatabase,
    pub bus: ChangeBus,
    pub mirror: Arc<ScriptedMirror>,
    pub poller: Arc<RepositoryPoller>,
    pub schedulers: Vec<Arc<ImmediateScheduler>>,
}

impl Pipeline {
    /// Start one scheduler per YAML document and a poller whose remote
    /// already holds one commit.
    pub async fn new(scheduler_yaml: &[&str]) -> anyhow::Result<Self> {
        Self::with_db(MemoryDatabase::new(), scheduler_yaml).await
    }

    /// Like [`Pipeline::new`], reusing existing storage as a restarted
    /// daemon would.
    pub async fn with_db(db: MemoryDatabase, scheduler_yaml: &[&str]) -> anyhow::Result<Self> {
        crate::init_test_logging();

        let bus = ChangeBus::new();
        let services = memory_services(&db, &bus);

        let mut schedulers = Vec::new();
        for yaml in scheduler_yaml {
            let config: SchedulerConfig = serde_yaml::from_str(yaml)?;
            let scheduler = ImmediateScheduler::from_config(&config, services.clone())?;
            scheduler.start().await?;
            schedulers.push(scheduler);
        }

        let mirror = Arc::new(ScriptedMirror::new(vec![CommitFixture::new("root")]));
        let dispatcher = ChangeDispatcher::new(db.changes(), bus.clone());
        let poller = Arc::new(RepositoryPoller::new(
            PollerConfig::new(REPO_URL).with_branch("master"),
            mirror.clone(),
            Arc::new(dispatcher),
        ));
        poller.start().await?;

        Ok(Self {
            db,
            bus,
            mirror,
            poller,
            schedulers,
        })
    }

    /// Services over this pipeline's storage and bus, for schedulers a test
    /// builds by hand.
    pub fn services(&self) -> SchedulerServices {
        memory_services(&self.db, &self.bus)
    }

    pub fn stop(&self) {
        self.poller.stop();
        for scheduler in &self.schedulers {
            scheduler.stop();
        }
    }
}

fn memory_services(db: &MemoryDatabase, bus: &ChangeBus) -> SchedulerServices {
    SchedulerServices {
        changes: db.changes(),
        sourcestamps: db.sourcestamps(),
        buildsets: db.buildsets(),
        state: db.scheduler_state(),
        bus: bus.clone(),
    }
}
