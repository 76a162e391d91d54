//! PostgreSQL implementation of SchedulerStateRepository.

use async_trait::async_trait;
use oxide_core::ids::SchedulerId;
use oxide_core::ports::SchedulerStateRepository;
use oxide_core::{Error, Result};
use sqlx::{PgPool, Row};

/// PostgreSQL implementation of SchedulerStateRepository.
pub struct PgSchedulerStateRepository {
    pool: PgPool,
}

impl PgSchedulerStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchedulerStateRepository for PgSchedulerStateRepository {
    async fn scheduler_id(&self, name: &str, class_name: &str) -> Result<SchedulerId> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            r#"INSERT INTO schedulers (name, class_name) VALUES ($1, $2)
               ON CONFLICT (name, class_name) DO UPDATE SET name = EXCLUDED.name
               RETURNING id"#,
        )
        .bind(name)
        .bind(class_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(SchedulerId::new(row.get("id")))
    }

    async fn get_state(&self, id: SchedulerId, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT value FROM scheduler_state WHERE schedulerid = $1 AND key = $2")
            .bind(id.get())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set_state(&self, id: SchedulerId, key: &str, value: &serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO scheduler_state (schedulerid, key, value) VALUES ($1, $2, $3)
               ON CONFLICT (schedulerid, key) DO UPDATE SET value = EXCLUDED.value"#,
        )
        .bind(id.get())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}
