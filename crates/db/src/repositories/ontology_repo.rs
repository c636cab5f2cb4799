//! Repository for the ontology tables.
//!
//! Ingestion only reads metatypes and relationship pairs. The `create_*`
//! helpers exist for seeding fixtures and tests.

use sqlx::types::Json;
use sqlx::PgConnection;
use strata_core::types::DbId;

use crate::models::ontology::{CreatePropertyKey, MetatypeRow, PropertyKeyRow, RelationshipPairRow};

/// Column list for `metatypes` queries.
const METATYPE_COLUMNS: &str = "id, container_id, name, description, archived, created_at, updated_at";

/// Key columns shared by both key tables, minus the owner column.
const KEY_COLUMNS: &str =
    "id, name, property_name, data_type, required, options, default_value, validation";

/// Column list for relationship pairs joined with their relationship.
const PAIR_COLUMNS: &str = "\
    p.id, p.container_id, p.name, p.origin_metatype_id, p.destination_metatype_id, \
    p.metatype_relationship_id, r.name AS relationship_name, p.relationship_type, \
    p.archived, p.created_at, p.updated_at";

pub struct OntologyRepo;

impl OntologyRepo {
    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn find_metatype(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<MetatypeRow>, sqlx::Error> {
        let query = format!("SELECT {METATYPE_COLUMNS} FROM metatypes WHERE id = $1");
        sqlx::query_as::<_, MetatypeRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Live keys of a metatype, in creation order.
    pub async fn list_metatype_keys(
        conn: &mut PgConnection,
        metatype_id: DbId,
    ) -> Result<Vec<PropertyKeyRow>, sqlx::Error> {
        let query = format!(
            "SELECT {KEY_COLUMNS}, metatype_id AS owner_id FROM metatype_keys \
             WHERE metatype_id = $1 AND NOT archived ORDER BY id"
        );
        sqlx::query_as::<_, PropertyKeyRow>(&query)
            .bind(metatype_id)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn find_relationship_pair(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<RelationshipPairRow>, sqlx::Error> {
        let query = format!(
            "SELECT {PAIR_COLUMNS} FROM metatype_relationship_pairs p \
             JOIN metatype_relationships r ON r.id = p.metatype_relationship_id \
             WHERE p.id = $1"
        );
        sqlx::query_as::<_, RelationshipPairRow>(&query)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Live keys of a relationship, in creation order.
    pub async fn list_relationship_keys(
        conn: &mut PgConnection,
        relationship_id: DbId,
    ) -> Result<Vec<PropertyKeyRow>, sqlx::Error> {
        let query = format!(
            "SELECT {KEY_COLUMNS}, metatype_relationship_id AS owner_id FROM metatype_relationship_keys \
             WHERE metatype_relationship_id = $1 AND NOT archived ORDER BY id"
        );
        sqlx::query_as::<_, PropertyKeyRow>(&query)
            .bind(relationship_id)
            .fetch_all(&mut *conn)
            .await
    }

    // -----------------------------------------------------------------------
    // Fixture writes
    // -----------------------------------------------------------------------

    pub async fn create_metatype(
        conn: &mut PgConnection,
        container_id: DbId,
        name: &str,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar("INSERT INTO metatypes (container_id, name) VALUES ($1, $2) RETURNING id")
            .bind(container_id)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn create_metatype_key(
        conn: &mut PgConnection,
        metatype_id: DbId,
        input: &CreatePropertyKey,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO metatype_keys \
                (metatype_id, name, property_name, data_type, required, options, default_value, validation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(metatype_id)
        .bind(&input.name)
        .bind(&input.property_name)
        .bind(&input.data_type)
        .bind(input.required)
        .bind(&input.options)
        .bind(&input.default_value)
        .bind(Json(&input.validation))
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn create_relationship(
        conn: &mut PgConnection,
        container_id: DbId,
        name: &str,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO metatype_relationships (container_id, name) VALUES ($1, $2) RETURNING id",
        )
        .bind(container_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn create_relationship_key(
        conn: &mut PgConnection,
        relationship_id: DbId,
        input: &CreatePropertyKey,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO metatype_relationship_keys \
                (metatype_relationship_id, name, property_name, data_type, required, options, \
                 default_value, validation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(relationship_id)
        .bind(&input.name)
        .bind(&input.property_name)
        .bind(&input.data_type)
        .bind(input.required)
        .bind(&input.options)
        .bind(&input.default_value)
        .bind(Json(&input.validation))
        .fetch_one(&mut *conn)
        .await
    }

    /// `relationship_type` is one of `many:many`, `one:one`, `one:many`,
    /// `many:one`.
    pub async fn create_relationship_pair(
        conn: &mut PgConnection,
        container_id: DbId,
        name: &str,
        origin_metatype_id: DbId,
        destination_metatype_id: DbId,
        relationship_id: DbId,
        relationship_type: &str,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO metatype_relationship_pairs \
                (container_id, name, origin_metatype_id, destination_metatype_id, \
                 metatype_relationship_id, relationship_type) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(container_id)
        .bind(name)
        .bind(origin_metatype_id)
        .bind(destination_metatype_id)
        .bind(relationship_id)
        .bind(relationship_type)
        .fetch_one(&mut *conn)
        .await
    }
}
