//! Repository for the `edge_queue_items` table.
//!
//! Items are claimed one at a time with `FOR UPDATE SKIP LOCKED`, so several
//! workers can drain the queue without blocking each other.

use std::time::Duration;

use sqlx::types::Json;
use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::edge_queue::{CreateEdgeQueueItem, EdgeQueueItem};

/// Column list for `edge_queue_items` queries.
const COLUMNS: &str = "\
    id, import_id, data_staging_id, edge, attempts, match_passes, next_attempt_at, \
    error, file_attached, created_at, updated_at";

pub struct EdgeQueueRepo;

impl EdgeQueueRepo {
    /// Enqueue a batch, due immediately.
    pub async fn enqueue_many(
        conn: &mut PgConnection,
        items: &[CreateEdgeQueueItem],
    ) -> Result<u64, sqlx::Error> {
        if items.is_empty() {
            return Ok(0);
        }

        let import_ids: Vec<Option<DbId>> = items.iter().map(|i| i.import_id).collect();
        let staging_ids: Vec<Option<DbId>> = items.iter().map(|i| i.data_staging_id).collect();
        let edges: Vec<serde_json::Value> = items
            .iter()
            .map(|i| serde_json::to_value(&i.edge))
            .collect::<Result<_, _>>()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let files: Vec<bool> = items.iter().map(|i| i.file_attached).collect();

        let result = sqlx::query(
            "INSERT INTO edge_queue_items (import_id, data_staging_id, edge, file_attached) \
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::jsonb[], $4::boolean[])",
        )
        .bind(&import_ids)
        .bind(&staging_ids)
        .bind(&edges)
        .bind(&files)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn enqueue(
        conn: &mut PgConnection,
        item: &CreateEdgeQueueItem,
    ) -> Result<EdgeQueueItem, sqlx::Error> {
        let query = format!(
            "INSERT INTO edge_queue_items (import_id, data_staging_id, edge, file_attached) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, EdgeQueueItem>(&query)
            .bind(item.import_id)
            .bind(item.data_staging_id)
            .bind(Json(&item.edge))
            .bind(item.file_attached)
            .fetch_one(&mut *conn)
            .await
    }

    /// Lock the oldest due item not locked by another worker.
    pub async fn claim_due(conn: &mut PgConnection) -> Result<Option<EdgeQueueItem>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM edge_queue_items \
             WHERE next_attempt_at <= NOW() \
             ORDER BY next_attempt_at, id \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED"
        );
        sqlx::query_as::<_, EdgeQueueItem>(&query)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn record_failure(
        conn: &mut PgConnection,
        id: DbId,
        attempts: i32,
        delay: Duration,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE edge_queue_items SET \
                attempts = $2, \
                next_attempt_at = NOW() + make_interval(secs => $3), \
                error = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts)
        .bind(delay.as_secs_f64())
        .bind(error)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Schedule another matching pass of a parameter edge.
    pub async fn requeue(
        conn: &mut PgConnection,
        id: DbId,
        match_passes: i32,
        delay: Duration,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE edge_queue_items SET \
                match_passes = $2, \
                next_attempt_at = NOW() + make_interval(secs => $3), \
                error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(match_passes)
        .bind(delay.as_secs_f64())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM edge_queue_items WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<EdgeQueueItem>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM edge_queue_items WHERE id = $1");
        sqlx::query_as::<_, EdgeQueueItem>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn list_for_import(
        conn: &mut PgConnection,
        import_id: DbId,
    ) -> Result<Vec<EdgeQueueItem>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM edge_queue_items WHERE import_id = $1 ORDER BY id");
        sqlx::query_as::<_, EdgeQueueItem>(&query)
            .bind(import_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// Make every item due now. Used by operators and tests.
    pub async fn expedite_all(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE edge_queue_items SET next_attempt_at = NOW() WHERE next_attempt_at > NOW()")
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
