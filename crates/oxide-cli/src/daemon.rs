//! Wiring between storage, the change bus, pollers, and schedulers.

use crate::config::DaemonConfig;
use anyhow::Context;
use oxide_bus::{ChangeBus, ChangeDispatcher};
use oxide_db::{Database, MemoryDatabase};
use oxide_poller::{GitMirror, PollingService, RepositoryPoller};
use oxide_scheduler::{ImmediateScheduler, SchedulerServices};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Where changes, buildsets, and scheduler state are kept.
#[derive(Clone)]
pub enum Storage {
    Postgres(Database),
    Memory(MemoryDatabase),
}

impl Storage {
    /// Connect to PostgreSQL when a URL is configured, else fall back to
    /// memory.
    pub async fn open(config: &DaemonConfig) -> anyhow::Result<Self> {
        match config.resolved_database_url() {
            Some(url) => {
                let db = Database::connect(&url)
                    .await
                    .context("connecting to database")?;
                Ok(Storage::Postgres(db))
            }
            None => {
                warn!("No database configured, state will not survive a restart");
                Ok(Storage::Memory(MemoryDatabase::new()))
            }
        }
    }

    /// Connect to PostgreSQL, failing when no URL is configured.
    pub async fn postgres(config: &DaemonConfig) -> anyhow::Result<Database> {
        let url = config
            .resolved_database_url()
            .context("database_url is not configured and DATABASE_URL is unset")?;
        Database::connect(&url)
            .await
            .context("connecting to database")
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        if let Storage::Postgres(db) = self {
            db.migrate().await.context("running migrations")?;
            info!("Database migrations applied");
        }
        Ok(())
    }

    pub fn services(&self, bus: ChangeBus) -> SchedulerServices {
        match self {
            Storage::Postgres(db) => SchedulerServices {
                changes: db.changes(),
                sourcestamps: db.sourcestamps(),
                buildsets: db.buildsets(),
                state: db.scheduler_state(),
                bus,
            },
            Storage::Memory(db) => SchedulerServices {
                changes: db.changes(),
                sourcestamps: db.sourcestamps(),
                buildsets: db.buildsets(),
                state: db.scheduler_state(),
                bus,
            },
        }
    }
}

/// Every running component of one daemon.
pub struct Daemon {
    pub pollers: Vec<Arc<RepositoryPoller>>,
    pub schedulers: Vec<Arc<ImmediateScheduler>>,
    pub dispatcher: ChangeDispatcher,
}

impl Daemon {
    /// Start schedulers first so no change is published before they
    /// subscribe, then prepare every poller's mirror.
    pub async fn start(config: &DaemonConfig, storage: &Storage) -> anyhow::Result<Self> {
        let bus = ChangeBus::new();
        let services = storage.services(bus.clone());
        let dispatcher = ChangeDispatcher::new(services.changes.clone(), bus);

        let mut schedulers = Vec::with_capacity(config.schedulers.len());
        for scheduler_config in &config.schedulers {
            let scheduler = ImmediateScheduler::from_config(scheduler_config, services.clone())?;
            scheduler
                .start()
                .await
                .with_context(|| format!("starting scheduler {}", scheduler_config.name))?;
            schedulers.push(scheduler);
        }

        let mut pollers = Vec::with_capacity(config.pollers.len());
        for poller_config in &config.pollers {
            let mirror = Arc::new(GitMirror::from_config(poller_config));
            let poller = Arc::new(RepositoryPoller::new(
                poller_config.clone(),
                mirror,
                Arc::new(dispatcher.clone()),
            ));
            poller
                .start()
                .await
                .with_context(|| format!("starting poller {}", poller_config.name))?;
            info!(poller = %poller_config.name, "{}", poller.describe());
            pollers.push(poller);
        }

        Ok(Self {
            pollers,
            schedulers,
            dispatcher,
        })
    }

    /// Spawn one polling service per poller.
    pub fn spawn_polling(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.pollers
            .iter()
            .map(|poller| PollingService::new(poller.clone()).spawn(shutdown.clone()))
            .collect()
    }

    pub fn stop(&self) {
        for poller in &self.pollers {
            poller.stop();
        }
        for scheduler in &self.schedulers {
            scheduler.stop();
        }
    }
}
