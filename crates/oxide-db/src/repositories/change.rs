//! PostgreSQL implementation of ChangeRepository.

use async_trait::async_trait;
use oxide_core::change::{Change, NewChange};
use oxide_core::ids::ChangeId;
use oxide_core::ports::ChangeRepository;
use oxide_core::{Error, Result};
use sqlx::{PgPool, Row};

const CHANGE_COLUMNS: &str =
    "changeid, author, revision, branch, repository, project, category, comments, when_timestamp";

/// PostgreSQL implementation of ChangeRepository.
pub struct PgChangeRepository {
    pool: PgPool,
}

impl PgChangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn files(&self, id: ChangeId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT filename FROM change_files WHERE changeid = $1 ORDER BY position",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.iter().map(|r| r.get("filename")).collect())
    }

    async fn row_to_change(&self, r: &sqlx::postgres::PgRow) -> Result<Change> {
        let changeid = ChangeId::new(r.get("changeid"));
        Ok(Change {
            changeid,
            who: r.get("author"),
            revision: r.get("revision"),
            branch: r.get("branch"),
            repository: r.get("repository"),
            project: r.get("project"),
            category: r.get("category"),
            files: self.files(changeid).await?,
            comments: r.get("comments"),
            when: r.get("when_timestamp"),
        })
    }
}

#[async_trait]
impl ChangeRepository for PgChangeRepository {
    async fn add(&self, change: &NewChange) -> Result<Change> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let changeid: i64 = sqlx::query_scalar(
            r#"INSERT INTO changes (author, revision, branch, repository, project, category, comments, when_timestamp)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING changeid"#,
        )
        .bind(&change.who)
        .bind(&change.revision)
        .bind(&change.branch)
        .bind(&change.repository)
        .bind(&change.project)
        .bind(&change.category)
        .bind(&change.comments)
        .bind(change.when)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        for (position, filename) in change.files.iter().enumerate() {
            sqlx::query("INSERT INTO change_files (changeid, position, filename) VALUES ($1, $2, $3)")
                .bind(changeid)
                .bind(position as i32)
                .bind(filename)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Change::from_new(ChangeId::new(changeid), change.clone()))
    }

    async fn get(&self, id: ChangeId) -> Result<Option<Change>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM changes WHERE changeid = $1",
            CHANGE_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(self.row_to_change(&r).await?)),
            None => Ok(None),
        }
    }

    async fn recent(&self, limit: u32) -> Result<Vec<Change>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM changes ORDER BY changeid DESC LIMIT $1",
            CHANGE_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut changes = Vec::with_capacity(rows.len());
        for r in &rows {
            changes.push(self.row_to_change(r).await?);
        }
        Ok(changes)
    }
}
