//! PostgreSQL implementation of SourceStampRepository.

use async_trait::async_trait;
use oxide_core::buildset::{NewSourceStamp, Patch, SourceStamp};
use oxide_core::ids::{ChangeId, SourceStampId};
use oxide_core::ports::SourceStampRepository;
use oxide_core::{Error, Result};
use sqlx::{PgConnection, PgPool, Row};

/// PostgreSQL implementation of SourceStampRepository.
pub struct PgSourceStampRepository {
    pool: PgPool,
}

impl PgSourceStampRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert a source stamp and its change links on an open connection.
pub(crate) async fn insert_sourcestamp(
    conn: &mut PgConnection,
    sourcestamp: &NewSourceStamp,
) -> Result<i64> {
    let patch = sourcestamp.patch.as_ref();
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO sourcestamps (branch, revision, repository, project, patch_level, patch_body, patch_subdir)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id"#,
    )
    .bind(&sourcestamp.branch)
    .bind(&sourcestamp.revision)
    .bind(&sourcestamp.repository)
    .bind(&sourcestamp.project)
    .bind(patch.map(|p| p.level))
    .bind(patch.map(|p| p.body.as_str()))
    .bind(patch.and_then(|p| p.subdir.as_deref()))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| Error::Database(e.to_string()))?;

    for changeid in &sourcestamp.changeids {
        sqlx::query("INSERT INTO sourcestamp_changes (sourcestampid, changeid) VALUES ($1, $2)")
            .bind(id)
            .bind(changeid.get())
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
    }

    Ok(id)
}

#[async_trait]
impl SourceStampRepository for PgSourceStampRepository {
    async fn add(&self, sourcestamp: &NewSourceStamp) -> Result<SourceStampId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = insert_sourcestamp(&mut tx, sourcestamp).await?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(SourceStampId::new(id))
    }

    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>> {
        let row = sqlx::query(
            "SELECT id, branch, revision, repository, project, patch_level, patch_body, patch_subdir FROM sourcestamps WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let Some(r) = row else {
            return Ok(None);
        };

        let changeids: Vec<i64> = sqlx::query_scalar(
            "SELECT changeid FROM sourcestamp_changes WHERE sourcestampid = $1 ORDER BY changeid",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let patch = match (
            r.get::<Option<i32>, _>("patch_level"),
            r.get::<Option<String>, _>("patch_body"),
        ) {
            (Some(level), Some(body)) => Some(Patch {
                level,
                body,
                subdir: r.get("patch_subdir"),
            }),
            _ => None,
        };

        Ok(Some(SourceStamp {
            id,
            branch: r.get("branch"),
            revision: r.get("revision"),
            repository: r.get("repository"),
            project: r.get("project"),
            patch,
            changeids: changeids.into_iter().map(ChangeId::new).collect(),
        }))
    }
}
