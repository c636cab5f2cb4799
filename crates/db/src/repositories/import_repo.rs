//! Repository for the `imports` table.
//!
//! Status changes go through [`ImportStatus`] ids; nothing here writes a raw
//! status number.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::import::{CreateImport, Import};
use crate::models::status::{ImportStatus, TERMINAL_IMPORT_STATUSES};

/// Column list for `imports` queries.
const COLUMNS: &str = "\
    id, data_source_id, status_id, status_message, reference, \
    total_records, records_inserted, created_by, created_at, updated_at";

pub struct ImportRepo;

impl ImportRepo {
    /// Create an import in the `ready` state.
    pub async fn create(conn: &mut PgConnection, input: &CreateImport) -> Result<Import, sqlx::Error> {
        let query = format!(
            "INSERT INTO imports (data_source_id, status_id, reference, created_by) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Import>(&query)
            .bind(input.data_source_id)
            .bind(ImportStatus::Ready.id())
            .bind(&input.reference)
            .bind(&input.created_by)
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<Import>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM imports WHERE id = $1");
        sqlx::query_as::<_, Import>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Row-lock an import without waiting.
    ///
    /// Fails with SQLSTATE `55P03` (see [`crate::is_lock_unavailable`]) when
    /// another transaction already holds the lock.
    pub async fn lock_nowait(conn: &mut PgConnection, id: DbId) -> Result<Option<Import>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM imports WHERE id = $1 FOR UPDATE NOWAIT");
        sqlx::query_as::<_, Import>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Oldest non-terminal imports that have at least one unresolved row
    /// whose shape maps to an active mapping with live transformations.
    pub async fn list_processable(conn: &mut PgConnection, limit: i64) -> Result<Vec<Import>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM imports i \
             WHERE i.status_id NOT IN ($1, $2, $3) \
               AND EXISTS ( \
                   SELECT 1 FROM data_staging ds \
                   JOIN type_mappings tm \
                     ON tm.data_source_id = ds.data_source_id AND tm.shape_hash = ds.shape_hash \
                   WHERE ds.import_id = i.id \
                     AND ds.inserted_at IS NULL \
                     AND tm.active \
                     AND EXISTS ( \
                         SELECT 1 FROM type_transformations tt \
                         WHERE tt.type_mapping_id = tm.id AND NOT tt.archived)) \
             ORDER BY i.created_at ASC, i.id ASC \
             LIMIT $4"
        );
        sqlx::query_as::<_, Import>(&query)
            .bind(TERMINAL_IMPORT_STATUSES[0])
            .bind(TERMINAL_IMPORT_STATUSES[1])
            .bind(TERMINAL_IMPORT_STATUSES[2])
            .bind(limit)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn set_status(
        conn: &mut PgConnection,
        id: DbId,
        status: ImportStatus,
        message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE imports SET status_id = $2, status_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status.id())
            .bind(message)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn add_total_records(conn: &mut PgConnection, id: DbId, count: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE imports SET total_records = total_records + $2 WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Grow `records_inserted`. Negative counts are ignored so the column
    /// only ever increases.
    pub async fn add_records_inserted(conn: &mut PgConnection, id: DbId, count: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE imports SET records_inserted = records_inserted + GREATEST($2, 0) WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
