//! Graph write validator.
//!
//! Every node and edge produced by a transformation goes through
//! [`GraphWriter`] before it is persisted: properties are checked against the
//! ontology, edge endpoints are resolved to nodes, and relationship
//! cardinality is enforced. All writes run on the caller's connection so they
//! share the caller's transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use sqlx::PgConnection;
use strata_core::cardinality::Endpoint;
use strata_core::graph::{CompositeIdentity, EdgeDraft, EndpointRef, NodeDraft};
use strata_core::ontology::{Metatype, RelationshipPair};
use strata_core::transformation::{EdgeConnectionParameter, ParameterKind};
use strata_core::types::DbId;
use strata_db::models::edge::{Edge, ResolvedEdge};
use strata_db::models::node::{Node, NodeFilter};
use strata_db::repositories::{EdgeRepo, NodeRepo};

use crate::error::{PipelineError, PipelineResult};
use crate::ontology::Ontology;

/// Result of writing a parameter-matched edge.
#[derive(Debug, Default)]
pub struct ParameterEdgeOutcome {
    pub edges: Vec<Edge>,
    /// Candidate pairs rejected by the pair's cardinality.
    pub skipped: usize,
}

pub struct GraphWriter {
    ontology: Arc<dyn Ontology>,
    /// Upper bound on candidate nodes fetched per parameterized endpoint,
    /// and on parameter edges written per statement.
    chunk_size: i64,
}

impl GraphWriter {
    pub fn new(ontology: Arc<dyn Ontology>, chunk_size: i64) -> Self {
        Self { ontology, chunk_size }
    }

    pub fn ontology(&self) -> &Arc<dyn Ontology> {
        &self.ontology
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Validate and write one node: merge-update by id, or upsert by
    /// composite identity.
    pub async fn save_node(&self, conn: &mut PgConnection, mut draft: NodeDraft) -> PipelineResult<Node> {
        let metatype = self
            .ontology
            .find_metatype(draft.metatype_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("metatype {} not found", draft.metatype_id)))?;
        validate_node(&metatype, &mut draft)?;

        match draft.id {
            Some(id) => NodeRepo::update_partial(conn, id, &draft)
                .await?
                .ok_or_else(|| PipelineError::Resolution(format!("node {id} not found"))),
            None => Ok(NodeRepo::upsert(conn, &draft).await?),
        }
    }

    /// Validate a batch of drafts against their metatypes, fetched
    /// concurrently. Returns one result per draft, in input order.
    pub async fn validate_nodes(&self, drafts: Vec<NodeDraft>) -> PipelineResult<Vec<PipelineResult<NodeDraft>>> {
        let metatypes = self.load_metatypes(drafts.iter().map(|d| d.metatype_id)).await?;
        Ok(drafts
            .into_iter()
            .map(|mut draft| -> PipelineResult<NodeDraft> {
                let metatype = metatypes.get(&draft.metatype_id).ok_or_else(|| {
                    PipelineError::Resolution(format!("metatype {} not found", draft.metatype_id))
                })?;
                validate_node(metatype, &mut draft)?;
                Ok(draft)
            })
            .collect())
    }

    /// Validate and write a batch of nodes.
    ///
    /// Drafts sharing a composite identity collapse into the last one. Any
    /// invalid draft fails the whole batch before anything is written.
    pub async fn save_nodes(&self, conn: &mut PgConnection, drafts: Vec<NodeDraft>) -> PipelineResult<Vec<Node>> {
        if drafts.is_empty() {
            return Ok(vec![]);
        }

        let mut updates = Vec::new();
        let mut creates: Vec<NodeDraft> = Vec::new();
        let mut by_identity: HashMap<CompositeIdentity, usize> = HashMap::new();

        for checked in self.validate_nodes(drafts).await? {
            let draft = checked?;
            if draft.id.is_some() {
                updates.push(draft);
                continue;
            }
            match draft.composite_identity() {
                Some(identity) => match by_identity.get(&identity) {
                    Some(&slot) => creates[slot] = draft,
                    None => {
                        by_identity.insert(identity, creates.len());
                        creates.push(draft);
                    }
                },
                None => creates.push(draft),
            }
        }

        let mut saved = NodeRepo::bulk_update(conn, &updates).await?;
        if saved.len() < updates.len() {
            return Err(PipelineError::Resolution(format!(
                "{} of {} nodes to update were not found",
                updates.len() - saved.len(),
                updates.len()
            )));
        }
        saved.extend(NodeRepo::bulk_upsert(conn, &creates).await?);
        Ok(saved)
    }

    async fn load_metatypes(
        &self,
        ids: impl Iterator<Item = DbId>,
    ) -> PipelineResult<HashMap<DbId, Metatype>> {
        let mut ids: Vec<DbId> = ids.collect();
        ids.sort_unstable();
        ids.dedup();

        let found = join_all(ids.iter().map(|id| self.ontology.find_metatype(*id))).await;
        let mut metatypes = HashMap::with_capacity(ids.len());
        for (id, result) in ids.into_iter().zip(found) {
            if let Some(metatype) = result? {
                metatypes.insert(id, metatype);
            }
        }
        Ok(metatypes)
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    async fn find_pair(&self, pair_id: DbId) -> PipelineResult<RelationshipPair> {
        self.ontology
            .find_relationship_pair(pair_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("relationship pair {pair_id} not found")))
    }

    /// Validate and write one edge whose endpoints address single nodes.
    ///
    /// Fails with [`PipelineError::Resolution`] while an endpoint node does
    /// not exist, and with [`PipelineError::ConstraintViolation`] when the
    /// pair's cardinality would be exceeded.
    pub async fn save_edge(&self, conn: &mut PgConnection, draft: &EdgeDraft) -> PipelineResult<Edge> {
        let pair = self.find_pair(draft.relationship_pair_id).await?;
        self.write_edge(conn, &pair, draft).await
    }

    async fn write_edge(
        &self,
        conn: &mut PgConnection,
        pair: &RelationshipPair,
        draft: &EdgeDraft,
    ) -> PipelineResult<Edge> {
        if pair.container_id != draft.container_id {
            return Err(PipelineError::Validation(format!(
                "relationship pair {} is not part of container {}",
                pair.id, draft.container_id
            )));
        }
        let properties = pair.relationship.validate_and_transform_properties(&draft.properties)?;

        let origin = resolve_endpoint(conn, draft.container_id, &draft.origin, Endpoint::Origin).await?;
        let destination =
            resolve_endpoint(conn, draft.container_id, &draft.destination, Endpoint::Destination).await?;

        if !pair.accepts(origin.metatype_id, destination.metatype_id) {
            return Err(PipelineError::Validation(format!(
                "relationship pair {} does not connect metatype {} to metatype {}",
                pair.id, origin.metatype_id, destination.metatype_id
            )));
        }

        let composite_original_id = draft.composite_original_id();
        let constrained = pair.relationship_type.constrained_endpoints();
        if constrained.is_empty() && composite_original_id.is_none() {
            if let Some(existing) = EdgeRepo::find_between(conn, pair.id, origin.id, destination.id).await? {
                return Ok(existing);
            }
        }

        let mut origin_count = 0;
        let mut destination_count = 0;
        for endpoint in constrained {
            let node_id = endpoint_node(*endpoint, &origin, &destination);
            let count = EdgeRepo::count_participation(conn, pair.id, *endpoint, node_id, draft.id).await?;
            match endpoint {
                Endpoint::Origin => origin_count = count,
                Endpoint::Destination => destination_count = count,
            }
        }
        if pair
            .relationship_type
            .violated_endpoint(origin_count, destination_count)
            .is_some()
        {
            return Err(PipelineError::ConstraintViolation {
                pair_id: pair.id,
                origin_id: origin.id,
                destination_id: destination.id,
            });
        }

        let resolved = resolve_edge(draft, pair.id, &origin, &destination, Value::Object(properties));
        Ok(EdgeRepo::upsert(conn, &resolved).await?)
    }

    /// Expand a parameterized edge into every `(origin, destination)`
    /// candidate pair.
    ///
    /// A side without parameters resolves to its single addressed node.
    /// No candidate on a parameterized side is a
    /// [`PipelineError::Resolution`] so the edge is retried later.
    pub async fn expand_parameters(
        &self,
        conn: &mut PgConnection,
        pair: &RelationshipPair,
        draft: &EdgeDraft,
    ) -> PipelineResult<Vec<(Node, Node)>> {
        let origins = self
            .candidates(conn, draft, &draft.origin, &draft.origin_parameters, pair.origin_metatype_id, Endpoint::Origin)
            .await?;
        let destinations = self
            .candidates(
                conn,
                draft,
                &draft.destination,
                &draft.destination_parameters,
                pair.destination_metatype_id,
                Endpoint::Destination,
            )
            .await?;

        Ok(origins
            .iter()
            .flat_map(|o| destinations.iter().map(move |d| (o.clone(), d.clone())))
            .collect())
    }

    async fn candidates(
        &self,
        conn: &mut PgConnection,
        draft: &EdgeDraft,
        endpoint: &EndpointRef,
        parameters: &[EdgeConnectionParameter],
        metatype_id: DbId,
        side: Endpoint,
    ) -> PipelineResult<Vec<Node>> {
        if parameters.is_empty() {
            return Ok(vec![resolve_endpoint(conn, draft.container_id, endpoint, side).await?]);
        }

        let mut filter = node_filter(draft.container_id, parameters)?;
        filter.metatype_id.get_or_insert(metatype_id);
        let nodes = NodeRepo::list_by_filter(conn, &filter, self.chunk_size).await?;
        if nodes.is_empty() {
            return Err(PipelineError::Resolution(format!(
                "no {} node matches the edge parameters of pair {}",
                side_name(side),
                draft.relationship_pair_id
            )));
        }
        Ok(nodes)
    }

    /// Write every concrete edge a parameterized draft expands to, one
    /// `UNNEST` statement per chunk.
    ///
    /// Cardinality is checked for each candidate pair before its chunk is
    /// written, counting both stored edges and edges accepted earlier in the
    /// same expansion. Candidate pairs that would break it are skipped; any
    /// other failure aborts.
    pub async fn save_parameter_edge(
        &self,
        conn: &mut PgConnection,
        draft: &EdgeDraft,
    ) -> PipelineResult<ParameterEdgeOutcome> {
        let pair = self.find_pair(draft.relationship_pair_id).await?;
        if pair.container_id != draft.container_id {
            return Err(PipelineError::Validation(format!(
                "relationship pair {} is not part of container {}",
                pair.id, draft.container_id
            )));
        }
        let properties = Value::Object(pair.relationship.validate_and_transform_properties(&draft.properties)?);
        let constrained = pair.relationship_type.constrained_endpoints();

        let matches = self.expand_parameters(conn, &pair, draft).await?;
        let chunk_size = usize::try_from(self.chunk_size).unwrap_or(1).max(1);
        let mut participation: HashMap<(Endpoint, DbId), i64> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut outcome = ParameterEdgeOutcome::default();

        for chunk in matches.chunks(chunk_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for (origin, destination) in chunk {
                if !pair.accepts(origin.metatype_id, destination.metatype_id) {
                    return Err(PipelineError::Validation(format!(
                        "relationship pair {} does not connect metatype {} to metatype {}",
                        pair.id, origin.metatype_id, destination.metatype_id
                    )));
                }
                let bound = bind_to_nodes(draft, origin, destination);
                let composite_original_id = bound.composite_original_id();
                match &composite_original_id {
                    Some(id) if !seen.insert(id.clone()) => {
                        tracing::debug!(pair_id = pair.id, composite_original_id = %id, "Duplicate matched edge");
                        continue;
                    }
                    None if constrained.is_empty() => {
                        if let Some(existing) =
                            EdgeRepo::find_between(conn, pair.id, origin.id, destination.id).await?
                        {
                            outcome.edges.push(existing);
                            continue;
                        }
                    }
                    _ => {}
                }

                let mut origin_count = 0;
                let mut destination_count = 0;
                for endpoint in constrained {
                    let key = (*endpoint, endpoint_node(*endpoint, origin, destination));
                    let count = match participation.get(&key) {
                        Some(count) => *count,
                        None => {
                            let count = EdgeRepo::count_participation(conn, pair.id, key.0, key.1, None).await?;
                            participation.insert(key, count);
                            count
                        }
                    };
                    match endpoint {
                        Endpoint::Origin => origin_count = count,
                        Endpoint::Destination => destination_count = count,
                    }
                }
                if pair
                    .relationship_type
                    .violated_endpoint(origin_count, destination_count)
                    .is_some()
                {
                    tracing::warn!(
                        pair_id = pair.id,
                        origin_id = origin.id,
                        destination_id = destination.id,
                        "Skipping matched edge, cardinality exceeded"
                    );
                    outcome.skipped += 1;
                    continue;
                }
                for endpoint in constrained {
                    let key = (*endpoint, endpoint_node(*endpoint, origin, destination));
                    *participation.entry(key).or_default() += 1;
                }
                batch.push(resolve_edge(&bound, pair.id, origin, destination, properties.clone()));
            }
            outcome.edges.extend(EdgeRepo::bulk_upsert(conn, &batch).await?);
        }
        Ok(outcome)
    }
}

fn endpoint_node(endpoint: Endpoint, origin: &Node, destination: &Node) -> DbId {
    match endpoint {
        Endpoint::Origin => origin.id,
        Endpoint::Destination => destination.id,
    }
}

fn validate_node(metatype: &Metatype, draft: &mut NodeDraft) -> PipelineResult<()> {
    if metatype.container_id != draft.container_id {
        return Err(PipelineError::Validation(format!(
            "metatype {} is not part of container {}",
            metatype.id, draft.container_id
        )));
    }
    draft.properties = metatype.validate_and_transform_properties(&draft.properties)?;
    Ok(())
}

fn side_name(side: Endpoint) -> &'static str {
    match side {
        Endpoint::Origin => "origin",
        Endpoint::Destination => "destination",
    }
}

async fn resolve_endpoint(
    conn: &mut PgConnection,
    container_id: DbId,
    endpoint: &EndpointRef,
    side: Endpoint,
) -> PipelineResult<Node> {
    let node = match endpoint {
        EndpointRef { node_id: Some(id), .. } => NodeRepo::find_by_id(conn, *id).await?,
        EndpointRef {
            original_id: Some(original_id),
            metatype_id: Some(metatype_id),
            data_source_id: Some(data_source_id),
            ..
        } => {
            let identity = CompositeIdentity {
                container_id,
                data_source_id: *data_source_id,
                metatype_id: *metatype_id,
                original_data_id: original_id.clone(),
            };
            NodeRepo::find_by_composite(conn, &identity).await?
        }
        _ => {
            return Err(PipelineError::Validation(format!(
                "{} endpoint has neither a node id nor a complete original id",
                side_name(side)
            )))
        }
    };

    node.filter(|n| n.container_id == container_id).ok_or_else(|| {
        PipelineError::Resolution(format!("{} node {endpoint:?} does not exist yet", side_name(side)))
    })
}

/// The edge connecting two matched nodes, carrying their original ids so the
/// edge gets a composite id.
fn bind_to_nodes(draft: &EdgeDraft, origin: &Node, destination: &Node) -> EdgeDraft {
    let mut bound = draft.bound_to(origin.id, destination.id);
    bound.origin = endpoint_of(origin);
    bound.destination = endpoint_of(destination);
    bound
}

fn resolve_edge(
    draft: &EdgeDraft,
    pair_id: DbId,
    origin: &Node,
    destination: &Node,
    properties: Value,
) -> ResolvedEdge {
    ResolvedEdge {
        container_id: draft.container_id,
        relationship_pair_id: pair_id,
        data_source_id: draft.data_source_id,
        origin_id: origin.id,
        destination_id: destination.id,
        origin_original_id: draft.origin.original_id.clone().or_else(|| origin.original_data_id.clone()),
        origin_metatype_id: Some(origin.metatype_id),
        origin_data_source_id: draft.origin.data_source_id.or(origin.data_source_id),
        destination_original_id: draft
            .destination
            .original_id
            .clone()
            .or_else(|| destination.original_data_id.clone()),
        destination_metatype_id: Some(destination.metatype_id),
        destination_data_source_id: draft.destination.data_source_id.or(destination.data_source_id),
        composite_original_id: draft.composite_original_id(),
        properties,
        metadata: draft.metadata.clone(),
        import_data_id: draft.import_id,
        data_staging_id: draft.data_staging_id,
        type_mapping_transformation_id: draft.transformation_id,
    }
}

fn endpoint_of(node: &Node) -> EndpointRef {
    EndpointRef {
        node_id: Some(node.id),
        original_id: node.original_data_id.clone(),
        metatype_id: Some(node.metatype_id),
        data_source_id: node.data_source_id,
    }
}

fn id_value(kind: ParameterKind, value: &Value) -> PipelineResult<DbId> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| PipelineError::Validation(format!("edge parameter {kind:?} needs an id, got {value}")))
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Translate edge connection parameters into a node query. Parameters of
/// the same kind overwrite each other, except properties which accumulate.
pub fn node_filter(container_id: DbId, parameters: &[EdgeConnectionParameter]) -> PipelineResult<NodeFilter> {
    let mut filter = NodeFilter {
        container_id,
        ..NodeFilter::default()
    };

    for parameter in parameters {
        let value = parameter.value.as_ref().filter(|v| !v.is_null()).ok_or_else(|| {
            PipelineError::Validation(format!("edge parameter {:?} has no value", parameter.kind))
        })?;
        match parameter.kind {
            ParameterKind::DataSource => filter.data_source_id = Some(id_value(parameter.kind, value)?),
            ParameterKind::MetatypeId => filter.metatype_id = Some(id_value(parameter.kind, value)?),
            ParameterKind::Id => filter.id = Some(id_value(parameter.kind, value)?),
            ParameterKind::MetatypeName => filter.metatype_name = Some(text_value(value)),
            ParameterKind::OriginalId => filter.original_data_id = Some(text_value(value)),
            ParameterKind::Property => {
                let name = parameter.property.clone().ok_or_else(|| {
                    PipelineError::Validation("property edge parameter has no property name".into())
                })?;
                filter.properties.push((name, value.clone()));
            }
        }
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn param(kind: ParameterKind, value: Value) -> EdgeConnectionParameter {
        EdgeConnectionParameter {
            kind,
            key: None,
            property: None,
            value: Some(value),
        }
    }

    #[test]
    fn parameters_become_a_node_filter() {
        let mut prop = param(ParameterKind::Property, json!("S-9"));
        prop.property = Some("serial".into());
        let filter = node_filter(
            4,
            &[
                param(ParameterKind::DataSource, json!("12")),
                param(ParameterKind::MetatypeName, json!("Pump")),
                param(ParameterKind::OriginalId, json!(77)),
                prop,
            ],
        )
        .unwrap();

        assert_eq!(filter.container_id, 4);
        assert_eq!(filter.data_source_id, Some(12));
        assert_eq!(filter.metatype_name.as_deref(), Some("Pump"));
        assert_eq!(filter.original_data_id.as_deref(), Some("77"));
        assert_eq!(filter.properties, vec![("serial".to_string(), json!("S-9"))]);
        assert_eq!(filter.metatype_id, None);
    }

    #[test]
    fn parameter_without_value_is_rejected() {
        let mut p = param(ParameterKind::Id, json!(1));
        p.value = None;
        assert_matches!(node_filter(1, &[p]), Err(PipelineError::Validation(_)));
        assert_matches!(
            node_filter(1, &[param(ParameterKind::MetatypeId, json!("pump"))]),
            Err(PipelineError::Validation(_))
        );
        assert_matches!(
            node_filter(1, &[param(ParameterKind::Property, json!(1))]),
            Err(PipelineError::Validation(_))
        );
    }

    #[test]
    fn bound_edges_carry_matched_node_identity() {
        let now = chrono::Utc::now();
        let node = |id: DbId, original: &str| Node {
            id,
            container_id: 1,
            metatype_id: id * 10,
            data_source_id: Some(3),
            original_data_id: Some(original.into()),
            properties: json!({}),
            metadata: sqlx::types::Json(Default::default()),
            graph_id: None,
            import_data_id: None,
            data_staging_id: None,
            type_mapping_transformation_id: None,
            created_at: now,
            updated_at: now,
        };
        let draft = EdgeDraft {
            id: None,
            container_id: 1,
            relationship_pair_id: 5,
            data_source_id: Some(3),
            import_id: None,
            data_staging_id: None,
            transformation_id: None,
            origin: EndpointRef::by_original_id("a", 10, 3),
            destination: EndpointRef::default(),
            origin_parameters: vec![],
            destination_parameters: vec![param(ParameterKind::OriginalId, json!("b"))],
            properties: Default::default(),
            metadata: Default::default(),
        };

        let bound = bind_to_nodes(&draft, &node(1, "a"), &node(2, "b"));
        assert!(!bound.has_parameters());
        assert_eq!(bound.destination.node_id, Some(2));
        assert_eq!(bound.destination.metatype_id, Some(20));
        assert_eq!(bound.composite_original_id().as_deref(), Some("a+5+b"));
    }
}
