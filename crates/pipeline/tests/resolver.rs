#![cfg(feature = "db-tests")]

mod common;

use assert_matches::assert_matches;
use sqlx::PgPool;
use strata_core::mapping::TransformationInput;
use strata_core::transformation::TransformationTarget;
use strata_db::models::type_mapping::UpsertTypeMapping;
use strata_pipeline::PipelineError;

use common::*;

fn named(mut input: TransformationInput, name: &str) -> TransformationInput {
    input.name = Some(name.into());
    input
}

fn names(mapping: &strata_core::mapping::TypeMapping) -> Vec<&str> {
    mapping
        .transformations
        .iter()
        .filter_map(|t| t.name.as_deref())
        .collect()
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn save_applies_creates_updates_deletes_in_order(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, keys) = metatype(&pool, "Reading", &["a"]).await;
    let base = node_transformation(metatype_id, &keys, &["a"], "a");

    let first = active_mapping(&state, source, reading(1), vec![named(base.clone(), "x"), named(base.clone(), "y")]).await;
    assert_eq!(names(&first), ["x", "y"]);
    let (x, y) = (&first.transformations[0], &first.transformations[1]);

    // Drop x, move y behind a new z, rename y.
    let mut kept = TransformationInput::from(y);
    kept.name = Some("y2".into());
    let second = active_mapping(&state, source, reading(1), vec![named(base.clone(), "z"), kept]).await;

    assert_eq!(second.id, first.id);
    assert_eq!(names(&second), ["z", "y2"]);
    assert_eq!(second.transformations[1].id, y.id);
    assert!(second.transformations.iter().all(|t| t.id != x.id));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn saving_invalidates_cached_lookups(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, keys) = metatype(&pool, "Reading", &["a"]).await;
    let base = node_transformation(metatype_id, &keys, &["a"], "a");
    let hash = hash_of(&reading(1));
    let mut conn = pool.acquire().await.unwrap();

    active_mapping(&state, source, reading(1), vec![base.clone()]).await;
    let cached = state.resolver.find_by_shape_hash(&mut conn, source, &hash, true).await.unwrap().unwrap();
    assert_eq!(cached.transformations.len(), 1);

    active_mapping(&state, source, reading(1), vec![base.clone(), base.clone()]).await;
    let fresh = state.resolver.find_by_shape_hash(&mut conn, source, &hash, true).await.unwrap().unwrap();
    assert_eq!(fresh.transformations.len(), 2);

    let inactive = state.resolver.set_active(fresh.id, false).await.unwrap();
    assert!(!inactive.active);
    let looked_up = state.resolver.find_by_shape_hash(&mut conn, source, &hash, true).await.unwrap().unwrap();
    assert!(!looked_up.is_usable());

    assert!(state.resolver.delete(fresh.id).await.unwrap());
    assert!(state.resolver.find_by_shape_hash(&mut conn, source, &hash, true).await.unwrap().is_none());
    assert!(state.resolver.find_by_id(fresh.id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn invalid_transformation_is_rejected_before_writing(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, keys) = metatype(&pool, "Reading", &["a"]).await;
    let mut input = node_transformation(metatype_id, &keys, &["a"], "a");
    input.target = TransformationTarget::Node { metatype_id: 0 };

    let result = state
        .resolver
        .save(
            UpsertTypeMapping {
                container_id: CONTAINER,
                data_source_id: source,
                shape_hash: hash_of(&reading(1)),
                sample_payload: None,
                active: true,
            },
            vec![input],
        )
        .await;
    assert_matches!(result, Err(PipelineError::Validation(_)));

    let mappings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM type_mappings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mappings, 0);
}
