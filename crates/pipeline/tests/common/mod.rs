//! Fixtures shared by the pipeline integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::PgPool;
use strata_core::mapping::{TransformationInput, TypeMapping};
use strata_core::ontology::KeyValidation;
use strata_core::shape_hash::{shape_hash, ShapeHashOptions};
use strata_core::transformation::{
    EdgeTarget, KeyMapping, TransformationConfig, TransformationTarget,
};
use strata_core::types::DbId;
use strata_db::models::data_source::CreateDataSource;
use strata_db::models::ontology::CreatePropertyKey;
use strata_db::models::type_mapping::UpsertTypeMapping;
use strata_db::repositories::{DataSourceRepo, OntologyRepo};
use strata_events::EventBus;
use strata_pipeline::blob::PgBlobStore;
use strata_pipeline::ontology::PgOntology;
use strata_pipeline::process_queue::{ChannelQueue, ProcessJob};
use strata_pipeline::{IngestConfig, PipelineState};
use tokio::sync::mpsc;

pub const CONTAINER: DbId = 1;

pub fn pipeline(pool: &PgPool) -> (PipelineState, mpsc::Receiver<ProcessJob>) {
    pipeline_with(pool, IngestConfig::default())
}

pub fn pipeline_with(pool: &PgPool, config: IngestConfig) -> (PipelineState, mpsc::Receiver<ProcessJob>) {
    let (queue, jobs) = ChannelQueue::new(1024);
    let state = PipelineState::new(
        pool.clone(),
        config,
        Arc::new(PgOntology::new(pool.clone())),
        Arc::new(PgBlobStore),
        Arc::new(queue),
        Arc::new(EventBus::default()),
    );
    (state, jobs)
}

pub async fn data_source(pool: &PgPool, retention_days: Option<i32>) -> DbId {
    let mut conn = pool.acquire().await.unwrap();
    DataSourceRepo::create(
        &mut conn,
        &CreateDataSource {
            container_id: CONTAINER,
            name: "plant-sensors".into(),
            data_retention_days: retention_days,
            ..CreateDataSource::default()
        },
    )
    .await
    .unwrap()
    .id
}

/// A metatype with one optional `number` key per property name.
/// Returns the metatype id and the key ids in order.
pub async fn metatype(pool: &PgPool, name: &str, properties: &[&str]) -> (DbId, Vec<DbId>) {
    let mut conn = pool.acquire().await.unwrap();
    let id = OntologyRepo::create_metatype(&mut conn, CONTAINER, name).await.unwrap();
    let mut keys = Vec::new();
    for property in properties {
        let key = OntologyRepo::create_metatype_key(
            &mut conn,
            id,
            &CreatePropertyKey {
                name: property.to_string(),
                property_name: property.to_string(),
                data_type: "number".into(),
                required: false,
                options: vec![],
                default_value: None,
                validation: KeyValidation::default(),
            },
        )
        .await
        .unwrap();
        keys.push(key);
    }
    (id, keys)
}

pub async fn relationship_pair(
    pool: &PgPool,
    origin_metatype_id: DbId,
    destination_metatype_id: DbId,
    relationship_type: &str,
) -> DbId {
    let mut conn = pool.acquire().await.unwrap();
    let relationship = OntologyRepo::create_relationship(&mut conn, CONTAINER, "feeds").await.unwrap();
    OntologyRepo::create_relationship_pair(
        &mut conn,
        CONTAINER,
        "feeds",
        origin_metatype_id,
        destination_metatype_id,
        relationship,
        relationship_type,
    )
    .await
    .unwrap()
}

pub fn hash_of(record: &Value) -> String {
    shape_hash(record, &ShapeHashOptions::default())
}

/// Node transformation copying `properties` straight from the payload, with
/// `id_key` as the original id.
pub fn node_transformation(metatype_id: DbId, key_ids: &[DbId], properties: &[&str], id_key: &str) -> TransformationInput {
    TransformationInput {
        id: None,
        name: Some(format!("node-{metatype_id}")),
        target: TransformationTarget::Node { metatype_id },
        keys: properties
            .iter()
            .zip(key_ids)
            .map(|(property, key_id)| KeyMapping {
                key: Some(property.to_string()),
                metatype_key_id: Some(*key_id),
                ..KeyMapping::default()
            })
            .collect(),
        conditions: vec![],
        config: TransformationConfig::default(),
        root_array: None,
        unique_identifier_key: Some(id_key.into()),
        archived: false,
    }
}

pub fn edge_transformation(pair_id: DbId, origin_key: &str, destination_key: &str) -> TransformationInput {
    TransformationInput {
        id: None,
        name: Some(format!("edge-{pair_id}")),
        target: TransformationTarget::Edge(EdgeTarget {
            relationship_pair_id: pair_id,
            origin_id_key: Some(origin_key.into()),
            destination_id_key: Some(destination_key.into()),
            ..EdgeTarget::default()
        }),
        keys: vec![],
        conditions: vec![],
        config: TransformationConfig::default(),
        root_array: None,
        unique_identifier_key: None,
        archived: false,
    }
}

/// Save an active mapping for the shape of `sample`.
pub async fn active_mapping(
    state: &PipelineState,
    data_source_id: DbId,
    sample: Value,
    transformations: Vec<TransformationInput>,
) -> TypeMapping {
    state
        .resolver
        .save(
            UpsertTypeMapping {
                container_id: CONTAINER,
                data_source_id,
                shape_hash: hash_of(&sample),
                sample_payload: Some(sample),
                active: true,
            },
            transformations,
        )
        .await
        .unwrap()
}

pub fn reading(a: i64) -> Value {
    json!({ "a": a })
}
