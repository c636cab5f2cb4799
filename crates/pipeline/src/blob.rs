//! Blob store collaborator.
//!
//! Files uploaded with a record are linked to its staging row; once the
//! record becomes nodes and edges, the same files are linked to those.

use async_trait::async_trait;
use sqlx::PgConnection;
use strata_core::types::DbId;
use strata_db::models::file::File;
use strata_db::repositories::FileRepo;

use crate::error::PipelineResult;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn staged_files(&self, conn: &mut PgConnection, data_staging_id: DbId) -> PipelineResult<Vec<File>>;

    async fn attach_to_node(&self, conn: &mut PgConnection, node_id: DbId, file_ids: &[DbId]) -> PipelineResult<()>;

    async fn attach_to_edge(&self, conn: &mut PgConnection, edge_id: DbId, file_ids: &[DbId]) -> PipelineResult<()>;
}

/// File links kept in the `files` join tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgBlobStore;

#[async_trait]
impl BlobStore for PgBlobStore {
    async fn staged_files(&self, conn: &mut PgConnection, data_staging_id: DbId) -> PipelineResult<Vec<File>> {
        Ok(FileRepo::list_for_staging(conn, data_staging_id).await?)
    }

    async fn attach_to_node(&self, conn: &mut PgConnection, node_id: DbId, file_ids: &[DbId]) -> PipelineResult<()> {
        if !file_ids.is_empty() {
            FileRepo::attach_to_node(conn, node_id, file_ids).await?;
        }
        Ok(())
    }

    async fn attach_to_edge(&self, conn: &mut PgConnection, edge_id: DbId, file_ids: &[DbId]) -> PipelineResult<()> {
        if !file_ids.is_empty() {
            FileRepo::attach_to_edge(conn, edge_id, file_ids).await?;
        }
        Ok(())
    }
}
