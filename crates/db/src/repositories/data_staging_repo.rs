//! Repository for the `data_staging` table.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::data_staging::{CreateDataStaging, DataStaging};

/// Column list for `data_staging` queries.
const COLUMNS: &str = "\
    id, data_source_id, import_id, shape_hash, data, errors, \
    inserted_at, file_attached, created_at, updated_at";

/// Same columns, qualified for joins.
const QUALIFIED_COLUMNS: &str = "\
    ds.id, ds.data_source_id, ds.import_id, ds.shape_hash, ds.data, ds.errors, \
    ds.inserted_at, ds.file_attached, ds.created_at, ds.updated_at";

/// Filter shared by the unresolved-row queries: pending rows whose shape has
/// an active mapping with at least one live transformation.
const USABLE_MAPPING: &str = "\
    ds.inserted_at IS NULL \
    AND tm.active \
    AND EXISTS ( \
        SELECT 1 FROM type_transformations tt \
        WHERE tt.type_mapping_id = tm.id AND NOT tt.archived)";

pub struct DataStagingRepo;

impl DataStagingRepo {
    /// Insert a batch with a single `UNNEST` statement, preserving input
    /// order in the returned rows.
    pub async fn bulk_create(
        conn: &mut PgConnection,
        rows: &[CreateDataStaging],
    ) -> Result<Vec<DataStaging>, sqlx::Error> {
        if rows.is_empty() {
            return Ok(vec![]);
        }

        let source_ids: Vec<DbId> = rows.iter().map(|r| r.data_source_id).collect();
        let import_ids: Vec<DbId> = rows.iter().map(|r| r.import_id).collect();
        let hashes: Vec<String> = rows.iter().map(|r| r.shape_hash.clone()).collect();
        let data: Vec<serde_json::Value> = rows.iter().map(|r| r.data.clone()).collect();
        let files: Vec<bool> = rows.iter().map(|r| r.file_attached).collect();

        let query = format!(
            "INSERT INTO data_staging (data_source_id, import_id, shape_hash, data, file_attached) \
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::text[], $4::jsonb[], $5::boolean[]) \
             RETURNING {COLUMNS}"
        );
        let mut inserted = sqlx::query_as::<_, DataStaging>(&query)
            .bind(&source_ids)
            .bind(&import_ids)
            .bind(&hashes)
            .bind(&data)
            .bind(&files)
            .fetch_all(&mut *conn)
            .await?;
        inserted.sort_by_key(|r| r.id);
        Ok(inserted)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<DataStaging>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_staging WHERE id = $1");
        sqlx::query_as::<_, DataStaging>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn list_by_import(conn: &mut PgConnection, import_id: DbId) -> Result<Vec<DataStaging>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_staging WHERE import_id = $1 ORDER BY id");
        sqlx::query_as::<_, DataStaging>(&query)
            .bind(import_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// One page of processable rows, keyset-paged by id in creation order.
    pub async fn list_unresolved_page(
        conn: &mut PgConnection,
        import_id: DbId,
        after_id: DbId,
        limit: i64,
    ) -> Result<Vec<DataStaging>, sqlx::Error> {
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS} FROM data_staging ds \
             JOIN type_mappings tm \
               ON tm.data_source_id = ds.data_source_id AND tm.shape_hash = ds.shape_hash \
             WHERE ds.import_id = $1 AND ds.id > $2 AND {USABLE_MAPPING} \
             ORDER BY ds.id \
             LIMIT $3"
        );
        sqlx::query_as::<_, DataStaging>(&query)
            .bind(import_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
    }

    /// All rows of the import not yet inserted, mapped or not.
    pub async fn count_unresolved(conn: &mut PgConnection, import_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM data_staging WHERE import_id = $1 AND inserted_at IS NULL")
            .bind(import_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Mark rows inserted. Returns how many rows changed state.
    pub async fn mark_inserted(conn: &mut PgConnection, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE data_staging SET inserted_at = NOW(), errors = '{}' \
             WHERE id = ANY($1) AND inserted_at IS NULL",
        )
        .bind(ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Append an error unless the row already carries it.
    pub async fn add_error(conn: &mut PgConnection, id: DbId, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE data_staging SET errors = array_append(errors, $2) \
             WHERE id = $1 AND NOT ($2 = ANY(errors))",
        )
        .bind(id)
        .bind(error)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Append an error to every pending row of a shape in one import.
    pub async fn add_error_for_shape(
        conn: &mut PgConnection,
        import_id: DbId,
        shape_hash: &str,
        error: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_staging SET errors = array_append(errors, $3) \
             WHERE import_id = $1 AND shape_hash = $2 AND inserted_at IS NULL \
               AND NOT ($3 = ANY(errors))",
        )
        .bind(import_id)
        .bind(shape_hash)
        .bind(error)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Replace a row's errors with the latest processing failure.
    pub async fn set_errors(conn: &mut PgConnection, id: DbId, errors: &[String]) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE data_staging SET errors = $2 WHERE id = $1")
            .bind(id)
            .bind(errors)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Put every row of an import back into the pending state.
    pub async fn reset_import(conn: &mut PgConnection, import_id: DbId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE data_staging SET inserted_at = NULL, errors = '{}' WHERE import_id = $1",
        )
        .bind(import_id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
