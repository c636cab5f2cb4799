//! Node and edge drafts produced by the transformation engine and consumed
//! by the graph write validator.

use serde::{Deserialize, Serialize};

use crate::conversion::Conversion;
use crate::transformation::EdgeConnectionParameter;
use crate::types::{DbId, PropertyMap};

/// Conversions applied while projecting a record, kept on the graph object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetadata {
    #[serde(default)]
    pub conversions: Vec<Conversion>,
    #[serde(default)]
    pub failed_conversions: Vec<Conversion>,
    /// Root-array elements of the same record that could not be projected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_elements: Vec<SkippedElement>,
}

impl ConversionMetadata {
    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty() && self.failed_conversions.is_empty() && self.skipped_elements.is_empty()
    }
}

/// A root-array element dropped from a record's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedElement {
    /// Position at each array level of the root path.
    pub index: Vec<usize>,
    pub error: String,
}

/// Natural key of a node: the same source record ingested twice maps to the
/// same node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeIdentity {
    pub container_id: DbId,
    pub data_source_id: DbId,
    pub metatype_id: DbId,
    pub original_data_id: String,
}

/// A node that has not been written yet.
///
/// `id` is set only when updating an existing node by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDraft {
    #[serde(default)]
    pub id: Option<DbId>,
    pub container_id: DbId,
    pub metatype_id: DbId,
    pub data_source_id: Option<DbId>,
    #[serde(default)]
    pub import_id: Option<DbId>,
    #[serde(default)]
    pub data_staging_id: Option<DbId>,
    #[serde(default)]
    pub transformation_id: Option<DbId>,
    #[serde(default)]
    pub original_data_id: Option<String>,
    #[serde(default)]
    pub graph_id: Option<DbId>,
    pub properties: PropertyMap,
    #[serde(default)]
    pub metadata: ConversionMetadata,
}

impl NodeDraft {
    /// Composite identity, when the draft carries enough to have one.
    pub fn composite_identity(&self) -> Option<CompositeIdentity> {
        Some(CompositeIdentity {
            container_id: self.container_id,
            data_source_id: self.data_source_id?,
            metatype_id: self.metatype_id,
            original_data_id: self.original_data_id.clone()?,
        })
    }
}

/// How one end of an edge identifies its node.
///
/// Either a concrete node id, or a composite original id (original id plus
/// metatype and data source) to be looked up at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRef {
    #[serde(default)]
    pub node_id: Option<DbId>,
    #[serde(default)]
    pub original_id: Option<String>,
    #[serde(default)]
    pub metatype_id: Option<DbId>,
    #[serde(default)]
    pub data_source_id: Option<DbId>,
}

impl EndpointRef {
    pub fn by_id(node_id: DbId) -> Self {
        Self {
            node_id: Some(node_id),
            ..Self::default()
        }
    }

    pub fn by_original_id(original_id: impl Into<String>, metatype_id: DbId, data_source_id: DbId) -> Self {
        Self {
            node_id: None,
            original_id: Some(original_id.into()),
            metatype_id: Some(metatype_id),
            data_source_id: Some(data_source_id),
        }
    }

    /// Whether a single node lookup can resolve this endpoint.
    pub fn is_addressable(&self) -> bool {
        self.node_id.is_some()
            || (self.original_id.is_some() && self.metatype_id.is_some() && self.data_source_id.is_some())
    }
}

/// An edge that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDraft {
    #[serde(default)]
    pub id: Option<DbId>,
    pub container_id: DbId,
    pub relationship_pair_id: DbId,
    #[serde(default)]
    pub data_source_id: Option<DbId>,
    #[serde(default)]
    pub import_id: Option<DbId>,
    #[serde(default)]
    pub data_staging_id: Option<DbId>,
    #[serde(default)]
    pub transformation_id: Option<DbId>,
    pub origin: EndpointRef,
    pub destination: EndpointRef,
    /// Filters selecting candidate origin nodes instead of a single node.
    #[serde(default)]
    pub origin_parameters: Vec<EdgeConnectionParameter>,
    #[serde(default)]
    pub destination_parameters: Vec<EdgeConnectionParameter>,
    pub properties: PropertyMap,
    #[serde(default)]
    pub metadata: ConversionMetadata,
}

impl EdgeDraft {
    /// Whether either endpoint is described by match parameters.
    pub fn has_parameters(&self) -> bool {
        !self.origin_parameters.is_empty() || !self.destination_parameters.is_empty()
    }

    /// Natural key of the edge, derived from both endpoints' original ids.
    pub fn composite_original_id(&self) -> Option<String> {
        match (&self.origin.original_id, &self.destination.original_id) {
            (Some(origin), Some(destination)) => Some(format!(
                "{origin}+{}+{destination}",
                self.relationship_pair_id
            )),
            _ => None,
        }
    }

    /// A copy of this edge bound to concrete node ids, used when expanding
    /// parameter matches.
    pub fn bound_to(&self, origin_id: DbId, destination_id: DbId) -> Self {
        Self {
            origin: EndpointRef {
                node_id: Some(origin_id),
                ..self.origin.clone()
            },
            destination: EndpointRef {
                node_id: Some(destination_id),
                ..self.destination.clone()
            },
            origin_parameters: Vec::new(),
            destination_parameters: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge() -> EdgeDraft {
        EdgeDraft {
            id: None,
            container_id: 1,
            relationship_pair_id: 9,
            data_source_id: Some(2),
            import_id: None,
            data_staging_id: None,
            transformation_id: None,
            origin: EndpointRef::by_original_id("a", 3, 2),
            destination: EndpointRef::by_original_id("b", 4, 2),
            origin_parameters: vec![],
            destination_parameters: vec![],
            properties: PropertyMap::new(),
            metadata: ConversionMetadata::default(),
        }
    }

    #[test]
    fn edge_composite_id_needs_both_original_ids() {
        let mut e = edge();
        assert_eq!(e.composite_original_id().as_deref(), Some("a+9+b"));
        e.destination.original_id = None;
        assert_eq!(e.composite_original_id(), None);
    }

    #[test]
    fn bound_edge_keeps_original_ids_and_drops_parameters() {
        let bound = edge().bound_to(10, 20);
        assert_eq!(bound.origin.node_id, Some(10));
        assert_eq!(bound.destination.node_id, Some(20));
        assert_eq!(bound.origin.original_id.as_deref(), Some("a"));
        assert!(!bound.has_parameters());
    }

    #[test]
    fn endpoint_addressability() {
        assert!(EndpointRef::by_id(1).is_addressable());
        assert!(EndpointRef::by_original_id("x", 1, 1).is_addressable());
        let partial = EndpointRef {
            original_id: Some("x".into()),
            ..EndpointRef::default()
        };
        assert!(!partial.is_addressable());
    }
}
