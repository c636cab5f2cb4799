//! Ontology collaborator.
//!
//! The pipeline only reads the ontology. [`PgOntology`] loads metatypes and
//! relationship pairs with their live property keys from Postgres.

use async_trait::async_trait;
use strata_core::ontology::{Metatype, RelationshipPair};
use strata_core::types::DbId;
use strata_db::repositories::OntologyRepo;
use strata_db::DbPool;

use crate::error::PipelineResult;

#[async_trait]
pub trait Ontology: Send + Sync {
    async fn find_metatype(&self, id: DbId) -> PipelineResult<Option<Metatype>>;

    async fn find_relationship_pair(&self, id: DbId) -> PipelineResult<Option<RelationshipPair>>;
}

pub struct PgOntology {
    pool: DbPool,
}

impl PgOntology {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ontology for PgOntology {
    async fn find_metatype(&self, id: DbId) -> PipelineResult<Option<Metatype>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = OntologyRepo::find_metatype(&mut conn, id).await? else {
            return Ok(None);
        };
        if row.archived {
            return Ok(None);
        }
        let keys = OntologyRepo::list_metatype_keys(&mut conn, id).await?;
        Ok(Some(row.into_domain(keys)?))
    }

    async fn find_relationship_pair(&self, id: DbId) -> PipelineResult<Option<RelationshipPair>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = OntologyRepo::find_relationship_pair(&mut conn, id).await? else {
            return Ok(None);
        };
        if row.archived {
            return Ok(None);
        }
        let keys = OntologyRepo::list_relationship_keys(&mut conn, row.metatype_relationship_id).await?;
        Ok(Some(row.into_domain(keys)?))
    }
}

/// Fixed ontology held in memory. Used by tests and tools that run the
/// engine without a database.
#[derive(Debug, Default)]
pub struct StaticOntology {
    pub metatypes: Vec<Metatype>,
    pub pairs: Vec<RelationshipPair>,
}

#[async_trait]
impl Ontology for StaticOntology {
    async fn find_metatype(&self, id: DbId) -> PipelineResult<Option<Metatype>> {
        Ok(self.metatypes.iter().find(|m| m.id == id).cloned())
    }

    async fn find_relationship_pair(&self, id: DbId) -> PipelineResult<Option<RelationshipPair>> {
        Ok(self.pairs.iter().find(|p| p.id == id).cloned())
    }
}
