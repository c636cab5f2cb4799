//! Relationship cardinality rules.
//!
//! | relationship_type | rule |
//! |---|---|
//! | `many:many` | unconstrained |
//! | `one:one` | an endpoint may participate in the pair at most once, on either side |
//! | `one:many` | a destination may participate at most once |
//! | `many:one` | an origin may participate at most once |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Which side of an edge a node sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Origin,
    Destination,
}

impl Endpoint {
    /// Column on the `edges` table holding this endpoint's node id.
    pub fn node_column(self) -> &'static str {
        match self {
            Self::Origin => "origin_id",
            Self::Destination => "destination_id",
        }
    }
}

/// Cardinality of a metatype relationship pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "many:many")]
    ManyToMany,
    #[serde(rename = "one:one")]
    OneToOne,
    #[serde(rename = "one:many")]
    OneToMany,
    #[serde(rename = "many:one")]
    ManyToOne,
}

impl RelationshipType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManyToMany => "many:many",
            Self::OneToOne => "one:one",
            Self::OneToMany => "one:many",
            Self::ManyToOne => "many:one",
        }
    }

    /// Endpoints whose existing participation in the pair must be zero
    /// before a new edge may be written.
    pub fn constrained_endpoints(self) -> &'static [Endpoint] {
        match self {
            Self::ManyToMany => &[],
            Self::OneToOne => &[Endpoint::Origin, Endpoint::Destination],
            Self::OneToMany => &[Endpoint::Destination],
            Self::ManyToOne => &[Endpoint::Origin],
        }
    }

    /// Decide a write given the existing participation counts of each
    /// endpoint (edges already in the pair, excluding the edge being written).
    ///
    /// Returns the first endpoint that would be over-subscribed.
    pub fn violated_endpoint(self, origin_count: i64, destination_count: i64) -> Option<Endpoint> {
        self.constrained_endpoints()
            .iter()
            .copied()
            .find(|endpoint| match endpoint {
                Endpoint::Origin => origin_count > 0,
                Endpoint::Destination => destination_count > 0,
            })
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "many:many" => Ok(Self::ManyToMany),
            "one:one" => Ok(Self::OneToOne),
            "one:many" => Ok(Self::OneToMany),
            "many:one" => Ok(Self::ManyToOne),
            other => Err(CoreError::Validation(format!(
                "unknown relationship type `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_to_many_is_unconstrained() {
        assert_eq!(RelationshipType::ManyToMany.violated_endpoint(10, 10), None);
    }

    #[test]
    fn one_to_one_checks_both_sides() {
        let rt = RelationshipType::OneToOne;
        assert_eq!(rt.violated_endpoint(0, 0), None);
        assert_eq!(rt.violated_endpoint(1, 0), Some(Endpoint::Origin));
        assert_eq!(rt.violated_endpoint(0, 1), Some(Endpoint::Destination));
    }

    #[test]
    fn one_to_many_checks_destination_only() {
        let rt = RelationshipType::OneToMany;
        assert_eq!(rt.violated_endpoint(5, 0), None);
        assert_eq!(rt.violated_endpoint(0, 1), Some(Endpoint::Destination));
    }

    #[test]
    fn many_to_one_checks_origin_only() {
        let rt = RelationshipType::ManyToOne;
        assert_eq!(rt.violated_endpoint(0, 5), None);
        assert_eq!(rt.violated_endpoint(1, 0), Some(Endpoint::Origin));
    }

    #[test]
    fn parses_and_displays() {
        for s in ["many:many", "one:one", "one:many", "many:one"] {
            let rt: RelationshipType = s.parse().unwrap();
            assert_eq!(rt.to_string(), s);
        }
        assert!("one:few".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn serde_uses_colon_names() {
        let json = serde_json::to_string(&RelationshipType::OneToMany).unwrap();
        assert_eq!(json, "\"one:many\"");
    }
}
