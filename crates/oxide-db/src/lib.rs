//! Storage for changes, source stamps, buildsets, and scheduler state.
//!
//! [`Database`] backs the repository ports with PostgreSQL;
//! [`MemoryDatabase`] implements the same ports in process for tests and
//! one-shot runs.

pub mod memory;
pub mod repositories;

pub use memory::MemoryDatabase;
pub use repositories::*;

use oxide_core::ports::{
    BuildsetRepository, ChangeRepository, SchedulerStateRepository, SourceStampRepository,
};
use oxide_core::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| oxide_core::Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| oxide_core::Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn changes(&self) -> Arc<dyn ChangeRepository> {
        Arc::new(PgChangeRepository::new(self.pool.clone()))
    }

    pub fn sourcestamps(&self) -> Arc<dyn SourceStampRepository> {
        Arc::new(PgSourceStampRepository::new(self.pool.clone()))
    }

    pub fn buildsets(&self) -> Arc<dyn BuildsetRepository> {
        Arc::new(PgBuildsetRepository::new(self.pool.clone()))
    }

    pub fn scheduler_state(&self) -> Arc<dyn SchedulerStateRepository> {
        Arc::new(PgSchedulerStateRepository::new(self.pool.clone()))
    }
}
