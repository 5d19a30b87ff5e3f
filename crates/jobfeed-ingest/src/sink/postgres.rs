//! PostgreSQL sink
//!
//! Documents live in the `feed_jobs` table, one row per identifier. Fields are
//! kept in a `JSON` column, which stores the object text as sent and so keeps
//! feed order (JSONB would reorder the keys). The upsert is a single statement
//! that also reports the fingerprint stored before the write, which is how
//! created, replaced and unchanged writes are told apart.

use std::time::Duration;

use async_trait::async_trait;
use jobfeed_common::{checksum::fingerprint, FieldMap, Pagination, StoredJob};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};

use super::{UpsertSink, Written};
use crate::config::DatabaseConfig;
use crate::error::SinkError;

const UPSERT_SQL: &str = r#"
    WITH previous AS (
        SELECT content_sha256 FROM feed_jobs WHERE guid = $1
    )
    INSERT INTO feed_jobs (guid, fields, content_sha256, created_at, updated_at, refreshed_at)
    VALUES ($1, $2::json, $3, NOW(), NOW(), NOW())
    ON CONFLICT (guid) DO UPDATE SET
        fields = EXCLUDED.fields,
        content_sha256 = EXCLUDED.content_sha256,
        updated_at = CASE
            WHEN feed_jobs.content_sha256 = EXCLUDED.content_sha256 THEN feed_jobs.updated_at
            ELSE NOW()
        END,
        refreshed_at = NOW()
    RETURNING (SELECT content_sha256 FROM previous) AS previous_sha256
"#;

#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool for `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    pub async fn get(&self, identifier: &str) -> Result<Option<StoredJob>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT guid, fields, content_sha256, created_at, updated_at, refreshed_at
            FROM feed_jobs
            WHERE guid = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stored_job).transpose()
    }

    /// Newest documents first, by creation time.
    pub async fn list_page(&self, page: Pagination) -> Result<Vec<StoredJob>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT guid, fields, content_sha256, created_at, updated_at, refreshed_at
            FROM feed_jobs
            ORDER BY created_at DESC, guid
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_job).collect()
    }
}

/// Field map as JSON text, keys in feed order.
///
/// Bound as text and cast to `json` so the server never reparses it into
/// JSONB, which would reorder the keys.
fn field_document(fields: &FieldMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(fields)
}

fn stored_job(row: &PgRow) -> Result<StoredJob, sqlx::Error> {
    let Json(fields): Json<FieldMap> = row.try_get("fields")?;
    Ok(StoredJob {
        identifier: row.try_get("guid")?,
        fields,
        content_sha256: row.try_get("content_sha256")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        refreshed_at: row.try_get("refreshed_at")?,
    })
}

#[async_trait]
impl UpsertSink for PgSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn upsert(&self, identifier: &str, fields: &FieldMap) -> Result<Written, SinkError> {
        let content_sha256 = fingerprint(fields);
        let document = field_document(fields).map_err(|e| SinkError::new(identifier, e))?;

        let previous: Option<String> = sqlx::query(UPSERT_SQL)
            .bind(identifier)
            .bind(&document)
            .bind(&content_sha256)
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("previous_sha256"))
            .map_err(|e| SinkError::new(identifier, e))?;

        let written = Written::classify(previous.as_deref(), &content_sha256);
        debug!(identifier, ?written, "Upserted feed job");
        Ok(written)
    }

    async fn purge_expired(&self, retention: Duration) -> Result<u64, SinkError> {
        let result = sqlx::query(
            "DELETE FROM feed_jobs WHERE refreshed_at < NOW() - make_interval(secs => $1)",
        )
        .bind(retention.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::new("*", e))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_field_document_keeps_feed_order() {
        let fields: FieldMap = [("title", "Baker"), ("guid", "A1"), ("city", "Köln")]
            .into_iter()
            .collect();
        assert_eq!(
            field_document(&fields).unwrap(),
            r#"{"title":"Baker","guid":"A1","city":"Köln"}"#
        );

        let back: FieldMap = serde_json::from_str(&field_document(&fields).unwrap()).unwrap();
        let names: Vec<&str> = back.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["title", "guid", "city"]);
    }
}
