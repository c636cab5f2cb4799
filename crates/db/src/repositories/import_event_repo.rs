//! Repository for the `import_events` audit trail.

use sqlx::PgPool;
use strata_core::types::DbId;

use crate::models::import_event::{CreateImportEvent, ImportEvent};

const COLUMNS: &str = "id, event, data_source_id, import_id, detail, occurred_at, created_at";

pub struct ImportEventRepo;

impl ImportEventRepo {
    pub async fn insert(pool: &PgPool, input: &CreateImportEvent) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO import_events (event, data_source_id, import_id, detail, occurred_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(&input.event)
        .bind(input.data_source_id)
        .bind(input.import_id)
        .bind(&input.detail)
        .bind(input.occurred_at)
        .fetch_one(pool)
        .await
    }

    /// History of one import in the order it happened.
    pub async fn list_for_import(pool: &PgPool, import_id: DbId) -> Result<Vec<ImportEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_events WHERE import_id = $1 ORDER BY occurred_at, id"
        );
        sqlx::query_as::<_, ImportEvent>(&query)
            .bind(import_id)
            .fetch_all(pool)
            .await
    }

    /// Events naming a data source directly: received data and new shapes.
    pub async fn list_for_data_source(
        pool: &PgPool,
        data_source_id: DbId,
    ) -> Result<Vec<ImportEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM import_events WHERE data_source_id = $1 ORDER BY occurred_at, id"
        );
        sqlx::query_as::<_, ImportEvent>(&query)
            .bind(data_source_id)
            .fetch_all(pool)
            .await
    }
}
