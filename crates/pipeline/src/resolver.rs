//! Type mapping resolver.
//!
//! Finds the mapping of a `(data_source_id, shape_hash)` pair, creating an
//! inactive one the first time a shape is seen, and saves mappings with an
//! explicit transformation change-set. Every write invalidates the cache
//! before returning.

use std::sync::Arc;

use sqlx::PgConnection;
use strata_core::mapping::{
    TransformationChangeSet, TransformationInput, TypeMapping, NO_TRANSFORMATIONS_ERROR,
};
use strata_core::transformation::Transformation;
use strata_core::types::DbId;
use strata_db::models::type_mapping::{TransformationColumns, TypeMappingRow, UpsertTypeMapping};
use strata_db::repositories::{DataStagingRepo, TypeMappingRepo, TypeTransformationRepo};
use strata_db::DbPool;
use strata_events::{EventBus, PipelineEvent};
use validator::Validate;

use crate::cache::MappingCache;
use crate::error::{PipelineError, PipelineResult};

/// Mapping state of a shape, as seen while staging records.
#[derive(Debug, Clone)]
pub struct ShapeResolution {
    pub mapping: Arc<TypeMapping>,
    /// The mapping did not exist before this call.
    pub created: bool,
}

impl ShapeResolution {
    pub fn is_usable(&self) -> bool {
        self.mapping.is_usable()
    }
}

pub struct MappingResolver {
    pool: DbPool,
    cache: MappingCache,
    events: Arc<EventBus>,
}

async fn load_transformations(
    conn: &mut PgConnection,
    mapping_id: DbId,
) -> PipelineResult<Vec<Transformation>> {
    TypeTransformationRepo::list_for_mapping(conn, mapping_id)
        .await?
        .into_iter()
        .map(|row| row.into_domain().map_err(PipelineError::from))
        .collect()
}

async fn hydrate(conn: &mut PgConnection, row: TypeMappingRow) -> PipelineResult<TypeMapping> {
    let transformations = load_transformations(conn, row.id).await?;
    Ok(row.into_domain(transformations))
}

impl MappingResolver {
    pub fn new(pool: DbPool, cache: MappingCache, events: Arc<EventBus>) -> Self {
        Self { pool, cache, events }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Find the mapping of a shape.
    ///
    /// With `with_transformations` the cache is consulted first and filled on
    /// a miss; without it the bare row is read and the cache is bypassed.
    pub async fn find_by_shape_hash(
        &self,
        conn: &mut PgConnection,
        data_source_id: DbId,
        shape_hash: &str,
        with_transformations: bool,
    ) -> PipelineResult<Option<Arc<TypeMapping>>> {
        if with_transformations {
            if let Some(hit) = self.cache.get(data_source_id, shape_hash).await {
                return Ok(Some(hit));
            }
        }
        let generation = self.cache.generation();

        let Some(row) = TypeMappingRepo::find_by_shape_hash(conn, data_source_id, shape_hash).await? else {
            return Ok(None);
        };

        if !with_transformations {
            return Ok(Some(Arc::new(row.into_domain(Vec::new()))));
        }

        let mapping = Arc::new(hydrate(conn, row).await?);
        self.cache.insert_if_current(Arc::clone(&mapping), generation).await;
        Ok(Some(mapping))
    }

    pub async fn find_by_id(&self, mapping_id: DbId) -> PipelineResult<Option<TypeMapping>> {
        let mut conn = self.pool.acquire().await?;
        match TypeMappingRepo::find_by_id(&mut conn, mapping_id).await? {
            Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    /// Resolve the shape of freshly staged rows.
    ///
    /// An unknown shape gets an inactive mapping with no transformations.
    /// When the mapping cannot be used yet, the pending rows of this shape in
    /// `import_id` carry the informational error
    /// [`NO_TRANSFORMATIONS_ERROR`]. Runs on the caller's connection so it
    /// shares the ingestion transaction.
    pub async fn resolve_for_staging(
        &self,
        conn: &mut PgConnection,
        container_id: DbId,
        data_source_id: DbId,
        import_id: DbId,
        shape_hash: &str,
        sample_payload: &serde_json::Value,
    ) -> PipelineResult<ShapeResolution> {
        let resolution = match self.find_by_shape_hash(conn, data_source_id, shape_hash, true).await? {
            Some(mapping) => ShapeResolution { mapping, created: false },
            None => {
                let (row, created) = TypeMappingRepo::create_if_absent(
                    conn,
                    &UpsertTypeMapping {
                        container_id,
                        data_source_id,
                        shape_hash: shape_hash.to_string(),
                        sample_payload: Some(sample_payload.clone()),
                        active: false,
                    },
                )
                .await?;
                if created {
                    tracing::info!(
                        mapping_id = row.id,
                        data_source_id,
                        shape_hash,
                        "New shape detected, created inactive type mapping"
                    );
                }
                ShapeResolution {
                    mapping: Arc::new(hydrate(conn, row).await?),
                    created,
                }
            }
        };

        if !resolution.is_usable() {
            DataStagingRepo::add_error_for_shape(conn, import_id, shape_hash, NO_TRANSFORMATIONS_ERROR).await?;
        }
        Ok(resolution)
    }

    /// Announce a mapping created by [`resolve_for_staging`](Self::resolve_for_staging)
    /// once the surrounding transaction committed.
    pub fn announce_created(&self, resolution: &ShapeResolution) {
        if resolution.created {
            let m = &resolution.mapping;
            self.events
                .publish(PipelineEvent::type_mapping_created(m.id, m.data_source_id, &m.shape_hash));
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Upsert a mapping and bring its transformations in line with
    /// `desired`, in one transaction. Transformations run in the order given.
    pub async fn save(
        &self,
        mapping: UpsertTypeMapping,
        desired: Vec<TransformationInput>,
    ) -> PipelineResult<TypeMapping> {
        for input in &desired {
            input.validate()?;
        }

        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;
        let row = TypeMappingRepo::upsert(&mut tx, &mapping).await?;
        let existing = load_transformations(&mut tx, row.id).await?;

        let owned = |id: Option<DbId>| id.is_some_and(|id| existing.iter().any(|t| t.id == id));
        let kept: Vec<(DbId, i32)> = desired
            .iter()
            .enumerate()
            .filter(|(_, input)| owned(input.id))
            .filter_map(|(pos, input)| input.id.map(|id| (id, sort_order(pos))))
            .collect();
        let create_orders: Vec<i32> = desired
            .iter()
            .enumerate()
            .filter(|(_, input)| !owned(input.id))
            .map(|(pos, _)| sort_order(pos))
            .collect();

        let change_set = TransformationChangeSet::diff(&existing, desired);

        TypeTransformationRepo::delete_many(&mut tx, row.id, &change_set.to_delete).await?;

        let (kept_ids, kept_orders): (Vec<DbId>, Vec<i32>) = kept.iter().copied().unzip();
        TypeTransformationRepo::reorder(&mut tx, row.id, &kept_ids, &kept_orders).await?;

        for input in &change_set.to_update {
            let Some((id, order)) = input.id.and_then(|id| kept.iter().copied().find(|(k, _)| *k == id)) else {
                continue;
            };
            TypeTransformationRepo::update(&mut tx, id, row.id, order, &TransformationColumns::from(input)).await?;
        }

        // `diff` keeps creates in submission order.
        for (input, order) in change_set.to_create.iter().zip(create_orders) {
            TypeTransformationRepo::create(
                &mut tx,
                row.id,
                row.container_id,
                order,
                &TransformationColumns::from(input),
            )
            .await?;
        }

        let saved = hydrate(&mut tx, row).await?;
        tx.commit().await.map_err(PipelineError::transaction)?;

        self.cache.invalidate_mapping(saved.id).await;
        self.cache.invalidate_key(saved.data_source_id, &saved.shape_hash).await;
        tracing::info!(
            mapping_id = saved.id,
            created = change_set.to_create.len(),
            updated = change_set.to_update.len(),
            deleted = change_set.to_delete.len(),
            "Type mapping saved"
        );
        Ok(saved)
    }

    pub async fn set_active(&self, mapping_id: DbId, active: bool) -> PipelineResult<TypeMapping> {
        let mut conn = self.pool.acquire().await?;
        let row = TypeMappingRepo::set_active(&mut conn, mapping_id, active)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("type mapping {mapping_id} not found")))?;
        self.cache.invalidate_mapping(mapping_id).await;
        hydrate(&mut conn, row).await
    }

    pub async fn delete(&self, mapping_id: DbId) -> PipelineResult<bool> {
        let mut conn = self.pool.acquire().await?;
        let deleted = TypeMappingRepo::delete(&mut conn, mapping_id).await?;
        if let Some(row) = &deleted {
            self.cache.invalidate_key(row.data_source_id, &row.shape_hash).await;
        }
        self.cache.invalidate_mapping(mapping_id).await;
        Ok(deleted.is_some())
    }
}

fn sort_order(position: usize) -> i32 {
    i32::try_from(position).unwrap_or(i32::MAX)
}
