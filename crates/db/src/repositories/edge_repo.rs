//! Repository for the `edges` table.

use sqlx::types::Json;
use sqlx::PgConnection;
use strata_core::cardinality::Endpoint;
use strata_core::types::DbId;

use crate::models::edge::{Edge, ResolvedEdge};

/// Column list for `edges` queries.
const COLUMNS: &str = "\
    id, container_id, relationship_pair_id, data_source_id, origin_id, destination_id, \
    origin_original_id, origin_metatype_id, origin_data_source_id, \
    destination_original_id, destination_metatype_id, destination_data_source_id, \
    composite_original_id, properties, metadata, import_data_id, data_staging_id, \
    type_mapping_transformation_id, created_at, updated_at";

pub struct EdgeRepo;

impl EdgeRepo {
    /// Insert an edge, or overwrite the edge with the same
    /// `(data_source_id, composite_original_id)`.
    pub async fn upsert(conn: &mut PgConnection, edge: &ResolvedEdge) -> Result<Edge, sqlx::Error> {
        let query = format!(
            "INSERT INTO edges \
                (container_id, relationship_pair_id, data_source_id, origin_id, destination_id, \
                 origin_original_id, origin_metatype_id, origin_data_source_id, \
                 destination_original_id, destination_metatype_id, destination_data_source_id, \
                 composite_original_id, properties, metadata, import_data_id, data_staging_id, \
                 type_mapping_transformation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             ON CONFLICT (data_source_id, composite_original_id) DO UPDATE SET \
                 origin_id = EXCLUDED.origin_id, \
                 destination_id = EXCLUDED.destination_id, \
                 properties = EXCLUDED.properties, \
                 metadata = EXCLUDED.metadata, \
                 import_data_id = EXCLUDED.import_data_id, \
                 data_staging_id = EXCLUDED.data_staging_id, \
                 type_mapping_transformation_id = EXCLUDED.type_mapping_transformation_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Edge>(&query)
            .bind(edge.container_id)
            .bind(edge.relationship_pair_id)
            .bind(edge.data_source_id)
            .bind(edge.origin_id)
            .bind(edge.destination_id)
            .bind(&edge.origin_original_id)
            .bind(edge.origin_metatype_id)
            .bind(edge.origin_data_source_id)
            .bind(&edge.destination_original_id)
            .bind(edge.destination_metatype_id)
            .bind(edge.destination_data_source_id)
            .bind(&edge.composite_original_id)
            .bind(&edge.properties)
            .bind(Json(&edge.metadata))
            .bind(edge.import_data_id)
            .bind(edge.data_staging_id)
            .bind(edge.type_mapping_transformation_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Upsert a batch in one statement, keyed like [`EdgeRepo::upsert`].
    ///
    /// The batch must not contain two edges with the same
    /// `(data_source_id, composite_original_id)`.
    pub async fn bulk_upsert(conn: &mut PgConnection, edges: &[ResolvedEdge]) -> Result<Vec<Edge>, sqlx::Error> {
        if edges.is_empty() {
            return Ok(vec![]);
        }

        let container_ids: Vec<DbId> = edges.iter().map(|e| e.container_id).collect();
        let pair_ids: Vec<DbId> = edges.iter().map(|e| e.relationship_pair_id).collect();
        let source_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.data_source_id).collect();
        let origin_ids: Vec<DbId> = edges.iter().map(|e| e.origin_id).collect();
        let destination_ids: Vec<DbId> = edges.iter().map(|e| e.destination_id).collect();
        let origin_original_ids: Vec<Option<String>> = edges.iter().map(|e| e.origin_original_id.clone()).collect();
        let origin_metatype_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.origin_metatype_id).collect();
        let origin_source_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.origin_data_source_id).collect();
        let destination_original_ids: Vec<Option<String>> =
            edges.iter().map(|e| e.destination_original_id.clone()).collect();
        let destination_metatype_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.destination_metatype_id).collect();
        let destination_source_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.destination_data_source_id).collect();
        let composite_ids: Vec<Option<String>> = edges.iter().map(|e| e.composite_original_id.clone()).collect();
        let properties: Vec<serde_json::Value> = edges.iter().map(|e| e.properties.clone()).collect();
        let metadata: Vec<serde_json::Value> = edges
            .iter()
            .map(|e| serde_json::to_value(&e.metadata).unwrap_or_else(|_| serde_json::json!({})))
            .collect();
        let import_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.import_data_id).collect();
        let staging_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.data_staging_id).collect();
        let transformation_ids: Vec<Option<DbId>> = edges.iter().map(|e| e.type_mapping_transformation_id).collect();

        let query = format!(
            "INSERT INTO edges \
                (container_id, relationship_pair_id, data_source_id, origin_id, destination_id, \
                 origin_original_id, origin_metatype_id, origin_data_source_id, \
                 destination_original_id, destination_metatype_id, destination_data_source_id, \
                 composite_original_id, properties, metadata, import_data_id, data_staging_id, \
                 type_mapping_transformation_id) \
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[], $5::bigint[], \
                                  $6::text[], $7::bigint[], $8::bigint[], \
                                  $9::text[], $10::bigint[], $11::bigint[], \
                                  $12::text[], $13::jsonb[], $14::jsonb[], $15::bigint[], $16::bigint[], \
                                  $17::bigint[]) \
             ON CONFLICT (data_source_id, composite_original_id) DO UPDATE SET \
                 origin_id = EXCLUDED.origin_id, \
                 destination_id = EXCLUDED.destination_id, \
                 properties = EXCLUDED.properties, \
                 metadata = EXCLUDED.metadata, \
                 import_data_id = EXCLUDED.import_data_id, \
                 data_staging_id = EXCLUDED.data_staging_id, \
                 type_mapping_transformation_id = EXCLUDED.type_mapping_transformation_id \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Edge>(&query)
            .bind(&container_ids)
            .bind(&pair_ids)
            .bind(&source_ids)
            .bind(&origin_ids)
            .bind(&destination_ids)
            .bind(&origin_original_ids)
            .bind(&origin_metatype_ids)
            .bind(&origin_source_ids)
            .bind(&destination_original_ids)
            .bind(&destination_metatype_ids)
            .bind(&destination_source_ids)
            .bind(&composite_ids)
            .bind(&properties)
            .bind(&metadata)
            .bind(&import_ids)
            .bind(&staging_ids)
            .bind(&transformation_ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Number of edges of `pair_id` in which `node_id` sits on `endpoint`.
    ///
    /// Only the edge with id `exclude_edge_id` is left out of the count.
    pub async fn count_participation(
        conn: &mut PgConnection,
        pair_id: DbId,
        endpoint: Endpoint,
        node_id: DbId,
        exclude_edge_id: Option<DbId>,
    ) -> Result<i64, sqlx::Error> {
        let column = endpoint.node_column();
        let query = format!(
            "SELECT COUNT(*) FROM edges \
             WHERE relationship_pair_id = $1 AND {column} = $2 \
               AND ($3::bigint IS NULL OR id <> $3)"
        );
        sqlx::query_scalar(&query)
            .bind(pair_id)
            .bind(node_id)
            .bind(exclude_edge_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// An edge of `pair_id` already connecting the two nodes, if any.
    pub async fn find_between(
        conn: &mut PgConnection,
        pair_id: DbId,
        origin_id: DbId,
        destination_id: DbId,
    ) -> Result<Option<Edge>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM edges \
             WHERE relationship_pair_id = $1 AND origin_id = $2 AND destination_id = $3 \
             ORDER BY id LIMIT 1"
        );
        sqlx::query_as::<_, Edge>(&query)
            .bind(pair_id)
            .bind(origin_id)
            .bind(destination_id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<Edge>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM edges WHERE id = $1");
        sqlx::query_as::<_, Edge>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn list_for_pair(conn: &mut PgConnection, pair_id: DbId) -> Result<Vec<Edge>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM edges WHERE relationship_pair_id = $1 ORDER BY id");
        sqlx::query_as::<_, Edge>(&query)
            .bind(pair_id)
            .fetch_all(&mut *conn)
            .await
    }
}
