//! Repository for the `type_transformations` table.

use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::type_mapping::{TransformationColumns, TypeTransformationRow};

/// Column list for `type_transformations` queries.
const COLUMNS: &str = "\
    id, type_mapping_id, container_id, name, sort_order, kind, metatype_id, \
    metatype_relationship_pair_id, keys, conditions, config, root_array, \
    unique_identifier_key, origin_id_key, origin_metatype_id, origin_data_source_id, \
    destination_id_key, destination_metatype_id, destination_data_source_id, \
    origin_parameters, destination_parameters, archived, created_at, updated_at";

pub struct TypeTransformationRepo;

impl TypeTransformationRepo {
    /// Every transformation of a mapping, archived ones included, in
    /// execution order.
    pub async fn list_for_mapping(
        conn: &mut PgConnection,
        type_mapping_id: DbId,
    ) -> Result<Vec<TypeTransformationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM type_transformations \
             WHERE type_mapping_id = $1 \
             ORDER BY sort_order, id"
        );
        sqlx::query_as::<_, TypeTransformationRow>(&query)
            .bind(type_mapping_id)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn create(
        conn: &mut PgConnection,
        type_mapping_id: DbId,
        container_id: DbId,
        sort_order: i32,
        cols: &TransformationColumns,
    ) -> Result<TypeTransformationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO type_transformations \
                (type_mapping_id, container_id, sort_order, name, kind, metatype_id, \
                 metatype_relationship_pair_id, keys, conditions, config, root_array, \
                 unique_identifier_key, origin_id_key, origin_metatype_id, origin_data_source_id, \
                 destination_id_key, destination_metatype_id, destination_data_source_id, \
                 origin_parameters, destination_parameters, archived) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                     $16, $17, $18, $19, $20, $21) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TypeTransformationRow>(&query)
            .bind(type_mapping_id)
            .bind(container_id)
            .bind(sort_order)
            .bind(&cols.name)
            .bind(cols.kind)
            .bind(cols.metatype_id)
            .bind(cols.metatype_relationship_pair_id)
            .bind(&cols.keys)
            .bind(&cols.conditions)
            .bind(&cols.config)
            .bind(&cols.root_array)
            .bind(&cols.unique_identifier_key)
            .bind(&cols.edge.origin_id_key)
            .bind(cols.edge.origin_metatype_id)
            .bind(cols.edge.origin_data_source_id)
            .bind(&cols.edge.destination_id_key)
            .bind(cols.edge.destination_metatype_id)
            .bind(cols.edge.destination_data_source_id)
            .bind(sqlx::types::Json(&cols.edge.origin_parameters))
            .bind(sqlx::types::Json(&cols.edge.destination_parameters))
            .bind(cols.archived)
            .fetch_one(&mut *conn)
            .await
    }

    /// Rewrite a transformation of `type_mapping_id`. Returns `None` when
    /// the id belongs to another mapping or does not exist.
    pub async fn update(
        conn: &mut PgConnection,
        id: DbId,
        type_mapping_id: DbId,
        sort_order: i32,
        cols: &TransformationColumns,
    ) -> Result<Option<TypeTransformationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE type_transformations SET \
                sort_order = $3, name = $4, kind = $5, metatype_id = $6, \
                metatype_relationship_pair_id = $7, keys = $8, conditions = $9, config = $10, \
                root_array = $11, unique_identifier_key = $12, origin_id_key = $13, \
                origin_metatype_id = $14, origin_data_source_id = $15, destination_id_key = $16, \
                destination_metatype_id = $17, destination_data_source_id = $18, \
                origin_parameters = $19, destination_parameters = $20, archived = $21 \
             WHERE id = $1 AND type_mapping_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TypeTransformationRow>(&query)
            .bind(id)
            .bind(type_mapping_id)
            .bind(sort_order)
            .bind(&cols.name)
            .bind(cols.kind)
            .bind(cols.metatype_id)
            .bind(cols.metatype_relationship_pair_id)
            .bind(&cols.keys)
            .bind(&cols.conditions)
            .bind(&cols.config)
            .bind(&cols.root_array)
            .bind(&cols.unique_identifier_key)
            .bind(&cols.edge.origin_id_key)
            .bind(cols.edge.origin_metatype_id)
            .bind(cols.edge.origin_data_source_id)
            .bind(&cols.edge.destination_id_key)
            .bind(cols.edge.destination_metatype_id)
            .bind(cols.edge.destination_data_source_id)
            .bind(sqlx::types::Json(&cols.edge.origin_parameters))
            .bind(sqlx::types::Json(&cols.edge.destination_parameters))
            .bind(cols.archived)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Set the sort order of transformations of one mapping.
    pub async fn reorder(
        conn: &mut PgConnection,
        type_mapping_id: DbId,
        ids: &[DbId],
        sort_orders: &[i32],
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE type_transformations t SET sort_order = v.sort_order \
             FROM UNNEST($2::bigint[], $3::int[]) AS v(id, sort_order) \
             WHERE t.id = v.id AND t.type_mapping_id = $1 AND t.sort_order <> v.sort_order",
        )
        .bind(type_mapping_id)
        .bind(ids)
        .bind(sort_orders)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the given transformations of one mapping.
    pub async fn delete_many(
        conn: &mut PgConnection,
        type_mapping_id: DbId,
        ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "DELETE FROM type_transformations WHERE type_mapping_id = $1 AND id = ANY($2)",
        )
        .bind(type_mapping_id)
        .bind(ids)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }
}
