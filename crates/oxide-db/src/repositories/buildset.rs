//! PostgreSQL implementation of BuildsetRepository.

use async_trait::async_trait;
use chrono::Utc;
use oxide_core::buildset::{
    BuildRequest, BuildResult, Buildset, NewBuildset, NewSourceStamp, Properties, Property,
};
use oxide_core::ids::{BuildRequestId, BuildsetId, SourceStampId};
use oxide_core::ports::BuildsetRepository;
use oxide_core::{Error, Result};
use sqlx::{PgConnection, PgPool, Row};
use super::sourcestamp::insert_sourcestamp;
use tracing::debug;

/// PostgreSQL implementation of BuildsetRepository.
pub struct PgBuildsetRepository {
    pool: PgPool,
}

impl PgBuildsetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn properties(&self, id: BuildsetId) -> Result<Properties> {
        let rows = sqlx::query(
            "SELECT name, value, source FROM buildset_properties WHERE buildsetid = $1 ORDER BY position",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| Property {
                name: r.get("name"),
                value: r.get("value"),
                source: r.get("source"),
            })
            .collect())
    }
}

/// Insert a buildset, its properties, and its build requests on an open
/// connection.
pub(crate) async fn insert_buildset(conn: &mut PgConnection, buildset: &NewBuildset) -> Result<i64> {
    let submitted_at = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO buildsets (sourcestampid, reason, external_idstring, submitted_at)
           VALUES ($1, $2, $3, $4)
           RETURNING id"#,
    )
    .bind(buildset.sourcestampid.get())
    .bind(&buildset.reason)
    .bind(&buildset.external_idstring)
    .bind(submitted_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    for (position, property) in buildset.properties.iter().enumerate() {
        sqlx::query(
            "INSERT INTO buildset_properties (buildsetid, position, name, value, source) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(position as i32)
        .bind(&property.name)
        .bind(&property.value)
        .bind(&property.source)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    }

    for builder in &buildset.builder_names {
        sqlx::query(
            "INSERT INTO buildrequests (buildsetid, buildername, submitted_at) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(builder)
        .bind(submitted_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    }

    Ok(id)
}

#[async_trait]
impl BuildsetRepository for PgBuildsetRepository {
    async fn add(&self, buildset: &NewBuildset) -> Result<BuildsetId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = insert_buildset(&mut tx, buildset).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(buildset = id, requests = buildset.builder_names.len(), "Stored buildset");
        Ok(BuildsetId::new(id))
    }

    async fn add_with_sourcestamp(
        &self,
        sourcestamp: &NewSourceStamp,
        buildset: &NewBuildset,
    ) -> Result<(SourceStampId, BuildsetId)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let ssid = insert_sourcestamp(&mut tx, sourcestamp).await?;
        let buildset = NewBuildset {
            sourcestampid: SourceStampId::new(ssid),
            ..buildset.clone()
        };
        let id = insert_buildset(&mut tx, &buildset).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(buildset = id, sourcestamp = ssid, "Stored buildset with source stamp");
        Ok((SourceStampId::new(ssid), BuildsetId::new(id)))
    }

    async fn get(&self, id: BuildsetId) -> Result<Option<Buildset>> {
        let row = sqlx::query(
            "SELECT id, sourcestampid, reason, external_idstring, submitted_at, complete, results FROM buildsets WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let Some(r) = row else {
            return Ok(None);
        };

        let builder_names = self
            .build_requests(id)
            .await?
            .into_iter()
            .map(|br| br.builder_name)
            .collect();
        let results: Option<String> = r.get("results");

        Ok(Some(Buildset {
            id,
            sourcestampid: SourceStampId::new(r.get("sourcestampid")),
            reason: r.get("reason"),
            builder_names,
            external_idstring: r.get("external_idstring"),
            properties: self.properties(id).await?,
            submitted_at: r.get("submitted_at"),
            complete: r.get("complete"),
            results: results.as_deref().and_then(BuildResult::parse),
        }))
    }

    async fn build_requests(&self, id: BuildsetId) -> Result<Vec<BuildRequest>> {
        let rows = sqlx::query(
            "SELECT id, buildsetid, buildername, submitted_at FROM buildrequests WHERE buildsetid = $1 ORDER BY id",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| BuildRequest {
                id: BuildRequestId::new(r.get("id")),
                buildsetid: BuildsetId::new(r.get("buildsetid")),
                builder_name: r.get("buildername"),
                submitted_at: r.get("submitted_at"),
            })
            .collect())
    }

    async fn complete(&self, id: BuildsetId, results: BuildResult) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE buildsets SET complete = TRUE, complete_at = NOW(), results = $2 WHERE id = $1 AND NOT complete",
        )
        .bind(id.get())
        .bind(results.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM buildsets WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        match exists {
            Some(_) => Err(Error::BuildsetAlreadyComplete(id)),
            None => Err(Error::BuildsetNotFound(id)),
        }
    }
}
