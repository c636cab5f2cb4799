//! Repository for the `type_mappings` table.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::type_mapping::{TypeMappingRow, UpsertTypeMapping};

/// Column list for `type_mappings` queries.
const COLUMNS: &str = "\
    id, container_id, data_source_id, shape_hash, sample_payload, active, created_at, updated_at";

pub struct TypeMappingRepo;

impl TypeMappingRepo {
    /// Insert or update the mapping of `(data_source_id, shape_hash)`.
    ///
    /// An absent `sample_payload` keeps the stored one.
    pub async fn upsert(
        conn: &mut PgConnection,
        input: &UpsertTypeMapping,
    ) -> Result<TypeMappingRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO type_mappings (container_id, data_source_id, shape_hash, sample_payload, active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (data_source_id, shape_hash) DO UPDATE SET \
                 sample_payload = COALESCE(EXCLUDED.sample_payload, type_mappings.sample_payload), \
                 active = EXCLUDED.active \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(input.container_id)
            .bind(input.data_source_id)
            .bind(&input.shape_hash)
            .bind(&input.sample_payload)
            .bind(input.active)
            .fetch_one(&mut *conn)
            .await
    }

    /// Create the mapping unless one exists, returning whichever row is
    /// stored and whether this call created it.
    ///
    /// Concurrent callers for the same shape all see the same row.
    pub async fn create_if_absent(
        conn: &mut PgConnection,
        input: &UpsertTypeMapping,
    ) -> Result<(TypeMappingRow, bool), sqlx::Error> {
        let query = format!(
            "INSERT INTO type_mappings (container_id, data_source_id, shape_hash, sample_payload, active) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (data_source_id, shape_hash) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let created = sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(input.container_id)
            .bind(input.data_source_id)
            .bind(&input.shape_hash)
            .bind(&input.sample_payload)
            .bind(input.active)
            .fetch_optional(&mut *conn)
            .await?;

        match created {
            Some(row) => Ok((row, true)),
            None => Self::find_by_shape_hash(conn, input.data_source_id, &input.shape_hash)
                .await?
                .map(|row| (row, false))
                .ok_or(sqlx::Error::RowNotFound),
        }
    }

    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<TypeMappingRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM type_mappings WHERE id = $1");
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn find_by_shape_hash(
        conn: &mut PgConnection,
        data_source_id: DbId,
        shape_hash: &str,
    ) -> Result<Option<TypeMappingRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM type_mappings WHERE data_source_id = $1 AND shape_hash = $2"
        );
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(data_source_id)
            .bind(shape_hash)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn list_by_data_source(
        conn: &mut PgConnection,
        data_source_id: DbId,
    ) -> Result<Vec<TypeMappingRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM type_mappings WHERE data_source_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(data_source_id)
            .fetch_all(&mut *conn)
            .await
    }

    /// Returns the updated row, or `None` if the mapping does not exist.
    pub async fn set_active(
        conn: &mut PgConnection,
        id: DbId,
        active: bool,
    ) -> Result<Option<TypeMappingRow>, sqlx::Error> {
        let query = format!("UPDATE type_mappings SET active = $2 WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(id)
            .bind(active)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Delete a mapping and, by cascade, its transformations.
    pub async fn delete(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<TypeMappingRow>, sqlx::Error> {
        let query = format!("DELETE FROM type_mappings WHERE id = $1 RETURNING {COLUMNS}");
        sqlx::query_as::<_, TypeMappingRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }
}
