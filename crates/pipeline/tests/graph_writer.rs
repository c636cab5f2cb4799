#![cfg(feature = "db-tests")]

mod common;

use assert_matches::assert_matches;
use serde_json::{json, Value};
use sqlx::PgPool;
use strata_core::graph::{EdgeDraft, EndpointRef, NodeDraft};
use strata_core::transformation::{EdgeConnectionParameter, ParameterKind};
use strata_core::types::{DbId, PropertyMap};
use strata_db::repositories::EdgeRepo;
use strata_pipeline::{IngestConfig, PipelineError};

use common::*;

fn props(value: Value) -> PropertyMap {
    match value {
        Value::Object(map) => map,
        _ => PropertyMap::new(),
    }
}

fn node(metatype_id: DbId, source: DbId, original_id: &str, properties: Value) -> NodeDraft {
    NodeDraft {
        id: None,
        container_id: CONTAINER,
        metatype_id,
        data_source_id: Some(source),
        import_id: None,
        data_staging_id: None,
        transformation_id: None,
        original_data_id: Some(original_id.into()),
        graph_id: None,
        properties: props(properties),
        metadata: Default::default(),
    }
}

fn edge(pair_id: DbId, source: DbId, origin: EndpointRef, destination: EndpointRef) -> EdgeDraft {
    EdgeDraft {
        id: None,
        container_id: CONTAINER,
        relationship_pair_id: pair_id,
        data_source_id: Some(source),
        import_id: None,
        data_staging_id: None,
        transformation_id: None,
        origin,
        destination,
        origin_parameters: vec![],
        destination_parameters: vec![],
        properties: PropertyMap::new(),
        metadata: Default::default(),
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn node_upsert_reuses_composite_identity(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, _) = metatype(&pool, "Reading", &["a"]).await;
    let mut conn = pool.acquire().await.unwrap();

    let first = state.writer.save_node(&mut conn, node(metatype_id, source, "r-1", json!({"a": 1}))).await.unwrap();
    let second = state.writer.save_node(&mut conn, node(metatype_id, source, "r-1", json!({"a": 2}))).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.properties["a"], json!(2));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn batch_keeps_last_draft_per_identity(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, _) = metatype(&pool, "Reading", &["a"]).await;
    let mut conn = pool.acquire().await.unwrap();

    let saved = state
        .writer
        .save_nodes(
            &mut conn,
            vec![
                node(metatype_id, source, "r-1", json!({"a": 1})),
                node(metatype_id, source, "r-2", json!({"a": 5})),
                node(metatype_id, source, "r-1", json!({"a": 3})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(saved.len(), 2);
    let r1 = saved.iter().find(|n| n.original_data_id.as_deref() == Some("r-1")).unwrap();
    assert_eq!(r1.properties["a"], json!(3));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn invalid_draft_fails_the_whole_batch(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (metatype_id, _) = metatype(&pool, "Reading", &["a"]).await;
    let mut conn = pool.acquire().await.unwrap();

    let err = state
        .writer
        .save_nodes(
            &mut conn,
            vec![
                node(metatype_id, source, "r-1", json!({"a": 1})),
                node(metatype_id + 1000, source, "r-2", json!({"a": 2})),
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Resolution(_));

    let nodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes").fetch_one(&pool).await.unwrap();
    assert_eq!(nodes, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn missing_endpoint_is_a_resolution_error(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "many:many").await;
    let mut conn = pool.acquire().await.unwrap();

    let p = state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();
    let draft = edge(pair, source, EndpointRef::by_id(p.id), EndpointRef::by_original_id("v-404", valve, source));

    assert_matches!(state.writer.save_edge(&mut conn, &draft).await, Err(PipelineError::Resolution(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn one_to_one_pair_rejects_second_edge(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "one:one").await;
    let mut conn = pool.acquire().await.unwrap();

    state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-1", json!({"v": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-2", json!({"v": 2}))).await.unwrap();

    let to = |valve_id: &str| {
        edge(
            pair, source,
            EndpointRef::by_original_id("p-1", pump, source),
            EndpointRef::by_original_id(valve_id, valve, source),
        )
    };

    let first = state.writer.save_edge(&mut conn, &to("v-1")).await.unwrap();
    assert_eq!(first.composite_original_id.as_deref(), Some(format!("p-1+{pair}+v-1").as_str()));

    assert_matches!(
        state.writer.save_edge(&mut conn, &to("v-2")).await,
        Err(PipelineError::ConstraintViolation { pair_id, .. }) if pair_id == pair
    );

    assert_matches!(
        state.writer.save_edge(&mut conn, &to("v-1")).await,
        Err(PipelineError::ConstraintViolation { .. })
    );

    // Naming the existing edge by id rewrites it in place.
    let mut rewrite = to("v-1");
    rewrite.id = Some(first.id);
    let again = state.writer.save_edge(&mut conn, &rewrite).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(EdgeRepo::list_for_pair(&mut conn, pair).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn many_to_many_pair_accepts_repeats(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "many:many").await;
    let mut conn = pool.acquire().await.unwrap();

    state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-1", json!({"v": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-2", json!({"v": 2}))).await.unwrap();

    for valve_id in ["v-1", "v-2", "v-1"] {
        let draft = edge(
            pair, source,
            EndpointRef::by_original_id("p-1", pump, source),
            EndpointRef::by_original_id(valve_id, valve, source),
        );
        state.writer.save_edge(&mut conn, &draft).await.unwrap();
    }
    assert_eq!(EdgeRepo::list_for_pair(&mut conn, pair).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn edge_between_wrong_metatypes_is_rejected(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "many:many").await;
    let mut conn = pool.acquire().await.unwrap();

    let v = state.writer.save_node(&mut conn, node(valve, source, "v-1", json!({"v": 1}))).await.unwrap();
    let p = state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();

    let reversed = edge(pair, source, EndpointRef::by_id(v.id), EndpointRef::by_id(p.id));
    assert_matches!(state.writer.save_edge(&mut conn, &reversed).await, Err(PipelineError::Validation(_)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn parameters_connect_every_matching_node(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "many:many").await;
    let mut conn = pool.acquire().await.unwrap();

    state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-1", json!({"v": 7}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-2", json!({"v": 7}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-3", json!({"v": 8}))).await.unwrap();

    let mut draft = edge(pair, source, EndpointRef::by_original_id("p-1", pump, source), EndpointRef::default());
    draft.destination_parameters = vec![EdgeConnectionParameter {
        kind: ParameterKind::Property,
        key: None,
        property: Some("v".into()),
        value: Some(json!(7)),
    }];

    let outcome = state.writer.save_parameter_edge(&mut conn, &draft).await.unwrap();
    assert_eq!(outcome.edges.len(), 2);
    assert_eq!(outcome.skipped, 0);

    // A second match pass rewrites the same edges.
    state.writer.save_parameter_edge(&mut conn, &draft).await.unwrap();
    assert_eq!(EdgeRepo::list_for_pair(&mut conn, pair).await.unwrap().len(), 2);

    draft.destination_parameters[0].value = Some(json!(99));
    assert_matches!(
        state.writer.save_parameter_edge(&mut conn, &draft).await,
        Err(PipelineError::Resolution(_))
    );
}

fn by_property(property: &str, value: Value) -> Vec<EdgeConnectionParameter> {
    vec![EdgeConnectionParameter {
        kind: ParameterKind::Property,
        key: None,
        property: Some(property.into()),
        value: Some(value),
    }]
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn parameter_edges_are_written_in_chunks(pool: PgPool) {
    let (state, _jobs) = pipeline_with(
        &pool,
        IngestConfig {
            edge_insertion_chunk_size: 2,
            ..IngestConfig::default()
        },
    );
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let many = relationship_pair(&pool, pump, valve, "many:many").await;
    let one = relationship_pair(&pool, pump, valve, "one:one").await;
    let mut conn = pool.acquire().await.unwrap();

    for id in ["p-1", "p-2"] {
        state.writer.save_node(&mut conn, node(pump, source, id, json!({"a": 1}))).await.unwrap();
    }
    for id in ["v-1", "v-2"] {
        state.writer.save_node(&mut conn, node(valve, source, id, json!({"v": 7}))).await.unwrap();
    }

    let draft = |pair| {
        let mut draft = edge(pair, source, EndpointRef::default(), EndpointRef::default());
        draft.origin_parameters = by_property("a", json!(1));
        draft.destination_parameters = by_property("v", json!(7));
        draft
    };

    let outcome = state.writer.save_parameter_edge(&mut conn, &draft(many)).await.unwrap();
    assert_eq!(outcome.edges.len(), 4);
    state.writer.save_parameter_edge(&mut conn, &draft(many)).await.unwrap();
    assert_eq!(EdgeRepo::list_for_pair(&mut conn, many).await.unwrap().len(), 4);

    // Edges accepted in the first chunk count against the second.
    let outcome = state.writer.save_parameter_edge(&mut conn, &draft(one)).await.unwrap();
    assert_eq!(outcome.edges.len(), 2);
    assert_eq!(outcome.skipped, 2);

    let again = state.writer.save_parameter_edge(&mut conn, &draft(one)).await.unwrap();
    assert!(again.edges.is_empty());
    assert_eq!(again.skipped, 4);
    assert_eq!(EdgeRepo::list_for_pair(&mut conn, one).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn parameter_matches_over_cardinality_are_skipped(pool: PgPool) {
    let (state, _jobs) = pipeline(&pool);
    let source = data_source(&pool, None).await;
    let (pump, _) = metatype(&pool, "Pump", &["a"]).await;
    let (valve, _) = metatype(&pool, "Valve", &["v"]).await;
    let pair = relationship_pair(&pool, pump, valve, "one:many").await;
    let mut conn = pool.acquire().await.unwrap();

    state.writer.save_node(&mut conn, node(pump, source, "p-1", json!({"a": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(pump, source, "p-2", json!({"a": 1}))).await.unwrap();
    state.writer.save_node(&mut conn, node(valve, source, "v-1", json!({"v": 1}))).await.unwrap();

    let mut draft = edge(pair, source, EndpointRef::default(), EndpointRef::by_original_id("v-1", valve, source));
    draft.origin_parameters = vec![EdgeConnectionParameter {
        kind: ParameterKind::Property,
        key: None,
        property: Some("a".into()),
        value: Some(json!(1)),
    }];

    let outcome = state.writer.save_parameter_edge(&mut conn, &draft).await.unwrap();
    assert_eq!(outcome.edges.len(), 1);
    assert_eq!(outcome.skipped, 1);
}
