//! Repository for `files` and its join tables.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::file::{CreateFile, File};

/// Column list for `files` queries.
const COLUMNS: &str = "\
    id, container_id, data_source_id, file_name, file_size, md5hash, adapter, \
    adapter_file_path, created_at, updated_at";

/// Same columns, qualified for joins.
const QUALIFIED_COLUMNS: &str = "\
    f.id, f.container_id, f.data_source_id, f.file_name, f.file_size, f.md5hash, f.adapter, \
    f.adapter_file_path, f.created_at, f.updated_at";

pub struct FileRepo;

impl FileRepo {
    pub async fn create(conn: &mut PgConnection, input: &CreateFile) -> Result<File, sqlx::Error> {
        let query = format!(
            "INSERT INTO files \
                (container_id, data_source_id, file_name, file_size, md5hash, adapter, adapter_file_path) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, File>(&query)
            .bind(input.container_id)
            .bind(input.data_source_id)
            .bind(&input.file_name)
            .bind(input.file_size)
            .bind(&input.md5hash)
            .bind(&input.adapter)
            .bind(&input.adapter_file_path)
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn attach_to_staging(
        conn: &mut PgConnection,
        data_staging_id: DbId,
        file_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO data_staging_files (data_staging_id, file_id) VALUES ($1, $2) \
             ON CONFLICT (data_staging_id, file_id) DO NOTHING",
        )
        .bind(data_staging_id)
        .bind(file_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_for_staging(
        conn: &mut PgConnection,
        data_staging_id: DbId,
    ) -> Result<Vec<File>, sqlx::Error> {
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS} FROM files f \
             JOIN data_staging_files dsf ON dsf.file_id = f.id \
             WHERE dsf.data_staging_id = $1 ORDER BY f.id"
        );
        sqlx::query_as::<_, File>(&query)
            .bind(data_staging_id)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn attach_to_node(
        conn: &mut PgConnection,
        node_id: DbId,
        file_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO node_files (node_id, file_id) \
             SELECT $1, file_id FROM UNNEST($2::bigint[]) AS t(file_id) \
             ON CONFLICT (node_id, file_id) DO NOTHING",
        )
        .bind(node_id)
        .bind(file_ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn attach_to_edge(
        conn: &mut PgConnection,
        edge_id: DbId,
        file_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO edge_files (edge_id, file_id) \
             SELECT $1, file_id FROM UNNEST($2::bigint[]) AS t(file_id) \
             ON CONFLICT (edge_id, file_id) DO NOTHING",
        )
        .bind(edge_id)
        .bind(file_ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_for_node(conn: &mut PgConnection, node_id: DbId) -> Result<Vec<File>, sqlx::Error> {
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS} FROM files f \
             JOIN node_files nf ON nf.file_id = f.id \
             WHERE nf.node_id = $1 ORDER BY f.id"
        );
        sqlx::query_as::<_, File>(&query)
            .bind(node_id)
            .fetch_all(&mut *conn)
            .await
    }
}
