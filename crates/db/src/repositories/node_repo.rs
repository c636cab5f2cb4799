//! Repository for the `nodes` table.
//!
//! Nodes are addressed either by id or by their composite identity
//! `(container_id, data_source_id, metatype_id, original_data_id)`. Writes by
//! composite identity are upserts; writes by id merge the new properties
//! into the stored ones.

use sqlx::types::Json;
use sqlx::PgConnection;
use strata_core::graph::{CompositeIdentity, NodeDraft};
use strata_core::types::DbId;

use crate::models::node::{Node, NodeFilter};

/// Column list for `nodes` queries.
const COLUMNS: &str = "\
    id, container_id, metatype_id, data_source_id, original_data_id, properties, metadata, \
    graph_id, import_data_id, data_staging_id, type_mapping_transformation_id, \
    created_at, updated_at";

/// Same columns, qualified for `UPDATE ... FROM` statements.
const QUALIFIED_COLUMNS: &str = "\
    n.id, n.container_id, n.metatype_id, n.data_source_id, n.original_data_id, n.properties, \
    n.metadata, n.graph_id, n.import_data_id, n.data_staging_id, \
    n.type_mapping_transformation_id, n.created_at, n.updated_at";

/// Conflict clause shared by the single and bulk upserts.
const ON_IDENTITY_CONFLICT: &str = "\
    ON CONFLICT (container_id, data_source_id, metatype_id, original_data_id) DO UPDATE SET \
        properties = EXCLUDED.properties, \
        metadata = EXCLUDED.metadata, \
        graph_id = COALESCE(EXCLUDED.graph_id, nodes.graph_id), \
        import_data_id = EXCLUDED.import_data_id, \
        data_staging_id = EXCLUDED.data_staging_id, \
        type_mapping_transformation_id = EXCLUDED.type_mapping_transformation_id";

fn properties_value(draft: &NodeDraft) -> serde_json::Value {
    serde_json::Value::Object(draft.properties.clone())
}

fn metadata_value(draft: &NodeDraft) -> serde_json::Value {
    serde_json::to_value(&draft.metadata).unwrap_or_else(|_| serde_json::json!({}))
}

pub struct NodeRepo;

impl NodeRepo {
    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert a node, or overwrite the node with the same composite
    /// identity. Drafts without an original id always insert.
    pub async fn upsert(conn: &mut PgConnection, draft: &NodeDraft) -> Result<Node, sqlx::Error> {
        let query = format!(
            "INSERT INTO nodes \
                (container_id, metatype_id, data_source_id, original_data_id, properties, metadata, \
                 graph_id, import_data_id, data_staging_id, type_mapping_transformation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             {ON_IDENTITY_CONFLICT} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(draft.container_id)
            .bind(draft.metatype_id)
            .bind(draft.data_source_id)
            .bind(&draft.original_data_id)
            .bind(properties_value(draft))
            .bind(Json(&draft.metadata))
            .bind(draft.graph_id)
            .bind(draft.import_id)
            .bind(draft.data_staging_id)
            .bind(draft.transformation_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Merge `draft.properties` into the node `id`. Returns `None` when no
    /// node with that id exists in the draft's container.
    pub async fn update_partial(
        conn: &mut PgConnection,
        id: DbId,
        draft: &NodeDraft,
    ) -> Result<Option<Node>, sqlx::Error> {
        let query = format!(
            "UPDATE nodes SET \
                properties = properties || $3, \
                metadata = $4, \
                graph_id = COALESCE($5, graph_id), \
                import_data_id = COALESCE($6, import_data_id), \
                data_staging_id = COALESCE($7, data_staging_id), \
                type_mapping_transformation_id = COALESCE($8, type_mapping_transformation_id) \
             WHERE id = $1 AND container_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .bind(draft.container_id)
            .bind(properties_value(draft))
            .bind(Json(&draft.metadata))
            .bind(draft.graph_id)
            .bind(draft.import_id)
            .bind(draft.data_staging_id)
            .bind(draft.transformation_id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Upsert a batch in one statement.
    ///
    /// The batch must not contain two drafts with the same composite
    /// identity; Postgres rejects a statement that touches a row twice.
    pub async fn bulk_upsert(conn: &mut PgConnection, drafts: &[NodeDraft]) -> Result<Vec<Node>, sqlx::Error> {
        if drafts.is_empty() {
            return Ok(vec![]);
        }

        let container_ids: Vec<DbId> = drafts.iter().map(|d| d.container_id).collect();
        let metatype_ids: Vec<DbId> = drafts.iter().map(|d| d.metatype_id).collect();
        let source_ids: Vec<Option<DbId>> = drafts.iter().map(|d| d.data_source_id).collect();
        let original_ids: Vec<Option<String>> = drafts.iter().map(|d| d.original_data_id.clone()).collect();
        let properties: Vec<serde_json::Value> = drafts.iter().map(properties_value).collect();
        let metadata: Vec<serde_json::Value> = drafts.iter().map(metadata_value).collect();
        let graph_ids: Vec<Option<DbId>> = drafts.iter().map(|d| d.graph_id).collect();
        let import_ids: Vec<Option<DbId>> = drafts.iter().map(|d| d.import_id).collect();
        let staging_ids: Vec<Option<DbId>> = drafts.iter().map(|d| d.data_staging_id).collect();
        let transformation_ids: Vec<Option<DbId>> = drafts.iter().map(|d| d.transformation_id).collect();

        let query = format!(
            "INSERT INTO nodes \
                (container_id, metatype_id, data_source_id, original_data_id, properties, metadata, \
                 graph_id, import_data_id, data_staging_id, type_mapping_transformation_id) \
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::text[], \
                                  $5::jsonb[], $6::jsonb[], $7::bigint[], $8::bigint[], \
                                  $9::bigint[], $10::bigint[]) \
             {ON_IDENTITY_CONFLICT} \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(&container_ids)
            .bind(&metatype_ids)
            .bind(&source_ids)
            .bind(&original_ids)
            .bind(&properties)
            .bind(&metadata)
            .bind(&graph_ids)
            .bind(&import_ids)
            .bind(&staging_ids)
            .bind(&transformation_ids)
            .fetch_all(&mut *conn)
            .await
    }

    /// Merge-update a batch of drafts that carry an `id`. Drafts without an
    /// id, or whose id is not in their container, are skipped.
    pub async fn bulk_update(conn: &mut PgConnection, drafts: &[NodeDraft]) -> Result<Vec<Node>, sqlx::Error> {
        let with_id: Vec<(DbId, &NodeDraft)> = drafts
            .iter()
            .filter_map(|d| d.id.map(|id| (id, d)))
            .collect();
        if with_id.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<DbId> = with_id.iter().map(|(id, _)| *id).collect();
        let container_ids: Vec<DbId> = with_id.iter().map(|(_, d)| d.container_id).collect();
        let properties: Vec<serde_json::Value> = with_id.iter().map(|(_, d)| properties_value(d)).collect();
        let metadata: Vec<serde_json::Value> = with_id.iter().map(|(_, d)| metadata_value(d)).collect();

        let query = format!(
            "UPDATE nodes n SET \
                properties = n.properties || u.properties, \
                metadata = u.metadata \
             FROM UNNEST($1::bigint[], $2::bigint[], $3::jsonb[], $4::jsonb[]) \
                AS u(id, container_id, properties, metadata) \
             WHERE n.id = u.id AND n.container_id = u.container_id \
             RETURNING {QUALIFIED_COLUMNS}"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(&ids)
            .bind(&container_ids)
            .bind(&properties)
            .bind(&metadata)
            .fetch_all(&mut *conn)
            .await
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn find_by_id(conn: &mut PgConnection, id: DbId) -> Result<Option<Node>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM nodes WHERE id = $1");
        sqlx::query_as::<_, Node>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn find_by_composite(
        conn: &mut PgConnection,
        identity: &CompositeIdentity,
    ) -> Result<Option<Node>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM nodes \
             WHERE container_id = $1 AND data_source_id = $2 AND metatype_id = $3 \
               AND original_data_id = $4"
        );
        sqlx::query_as::<_, Node>(&query)
            .bind(identity.container_id)
            .bind(identity.data_source_id)
            .bind(identity.metatype_id)
            .bind(&identity.original_data_id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Nodes matching every set field of `filter`, oldest first.
    pub async fn list_by_filter(
        conn: &mut PgConnection,
        filter: &NodeFilter,
        limit: i64,
    ) -> Result<Vec<Node>, sqlx::Error> {
        let mut conditions = vec!["container_id = $1".to_string()];
        let mut param_idx: usize = 2;

        if filter.data_source_id.is_some() {
            conditions.push(format!("data_source_id = ${param_idx}"));
            param_idx += 1;
        }
        if filter.metatype_id.is_some() {
            conditions.push(format!("metatype_id = ${param_idx}"));
            param_idx += 1;
        }
        if filter.metatype_name.is_some() {
            conditions.push(format!(
                "metatype_id IN (SELECT id FROM metatypes WHERE container_id = $1 AND name = ${param_idx})"
            ));
            param_idx += 1;
        }
        if filter.original_data_id.is_some() {
            conditions.push(format!("original_data_id = ${param_idx}"));
            param_idx += 1;
        }
        if filter.id.is_some() {
            conditions.push(format!("id = ${param_idx}"));
            param_idx += 1;
        }
        let containment = (!filter.properties.is_empty()).then(|| {
            serde_json::Value::Object(filter.properties.iter().cloned().collect())
        });
        if containment.is_some() {
            conditions.push(format!("properties @> ${param_idx}"));
            param_idx += 1;
        }

        let query = format!(
            "SELECT {COLUMNS} FROM nodes WHERE {} ORDER BY id LIMIT ${param_idx}",
            conditions.join(" AND ")
        );

        let mut q = sqlx::query_as::<_, Node>(&query).bind(filter.container_id);
        if let Some(ds) = filter.data_source_id {
            q = q.bind(ds);
        }
        if let Some(mt) = filter.metatype_id {
            q = q.bind(mt);
        }
        if let Some(name) = &filter.metatype_name {
            q = q.bind(name);
        }
        if let Some(original) = &filter.original_data_id {
            q = q.bind(original);
        }
        if let Some(id) = filter.id {
            q = q.bind(id);
        }
        if let Some(props) = containment {
            q = q.bind(props);
        }
        q.bind(limit).fetch_all(&mut *conn).await
    }
}
