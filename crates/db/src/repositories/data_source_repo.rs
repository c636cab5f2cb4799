//! Repository for the `data_sources` table.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::data_source::{CreateDataSource, DataSource};

/// Column list for `data_sources` queries.
const COLUMNS: &str = "\
    id, container_id, name, active, stop_nodes, value_nodes, \
    data_retention_days, created_at, updated_at";

/// Retention applied when a new source does not specify one.
const DEFAULT_RETENTION_DAYS: i32 = 30;

pub struct DataSourceRepo;

impl DataSourceRepo {
    pub async fn create(
        conn: &mut PgConnection,
        input: &CreateDataSource,
    ) -> Result<DataSource, sqlx::Error> {
        let query = format!(
            "INSERT INTO data_sources (container_id, name, stop_nodes, value_nodes, data_retention_days) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DataSource>(&query)
            .bind(input.container_id)
            .bind(&input.name)
            .bind(&input.stop_nodes)
            .bind(&input.value_nodes)
            .bind(input.data_retention_days.unwrap_or(DEFAULT_RETENTION_DAYS))
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<DataSource>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_sources WHERE id = $1");
        sqlx::query_as::<_, DataSource>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }
}
