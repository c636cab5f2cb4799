//! Import processing loop.
//!
//! Each poll picks the oldest imports that have pending rows with a usable
//! mapping and runs one pass over each. A pass holds the import's row lock
//! (`FOR UPDATE NOWAIT`) for its whole transaction; an import locked by
//! another worker is skipped silently.
//!
//! Within a pass every staging row runs in its own savepoint. A row that
//! fails validation or resolution keeps its error and stays pending; a
//! database failure rolls back the whole pass and is recorded on the row
//! that triggered it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::{Acquire, PgConnection};
use strata_core::graph::EdgeDraft;
use strata_core::import_status::ImportState;
use strata_core::mapping::{TypeMapping, NO_TRANSFORMATIONS_ERROR};
use strata_core::ontology::{Metatype, RelationshipPair};
use strata_core::shape_hash::shape_hash;
use strata_core::transformation::{apply_transformation, StagingContext, TargetSchema, TransformOutput, TransformationTarget};
use strata_core::types::DbId;
use strata_db::models::data_staging::DataStaging;
use strata_db::models::edge_queue::CreateEdgeQueueItem;
use strata_db::models::import::Import;
use strata_db::models::status::ImportStatus;
use strata_db::repositories::{DataSourceRepo, DataStagingRepo, EdgeQueueRepo, ImportRepo};
use strata_db::DbPool;
use strata_events::{EventBus, PipelineEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::error::{PipelineError, PipelineResult};
use crate::graph_writer::GraphWriter;
use crate::ontology::Ontology;
use crate::process_queue::ProcessJob;
use crate::resolver::MappingResolver;

/// Result of one pass over an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Locked by another worker, missing, or already terminal.
    Skipped,
    Processed {
        inserted: u64,
        failed: u64,
        state: ImportState,
    },
}

/// Graph objects written for one record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordWrites {
    pub nodes: usize,
    pub edges: usize,
    pub queued_edges: usize,
}

/// Ontology objects already fetched during a pass.
#[derive(Default)]
struct SchemaMemo {
    metatypes: HashMap<DbId, Arc<Metatype>>,
    pairs: HashMap<DbId, Arc<RelationshipPair>>,
}

impl SchemaMemo {
    async fn metatype(&mut self, ontology: &dyn Ontology, id: DbId) -> PipelineResult<Arc<Metatype>> {
        if let Some(metatype) = self.metatypes.get(&id) {
            return Ok(Arc::clone(metatype));
        }
        let metatype = ontology
            .find_metatype(id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| PipelineError::Configuration(format!("metatype {id} does not exist or is archived")))?;
        self.metatypes.insert(id, Arc::clone(&metatype));
        Ok(metatype)
    }

    async fn pair(&mut self, ontology: &dyn Ontology, id: DbId) -> PipelineResult<Arc<RelationshipPair>> {
        if let Some(pair) = self.pairs.get(&id) {
            return Ok(Arc::clone(pair));
        }
        let pair = ontology
            .find_relationship_pair(id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| {
                PipelineError::Configuration(format!("relationship pair {id} does not exist or is archived"))
            })?;
        self.pairs.insert(id, Arc::clone(&pair));
        Ok(pair)
    }
}

pub struct ImportProcessor {
    pool: DbPool,
    resolver: Arc<MappingResolver>,
    writer: Arc<GraphWriter>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<EventBus>,
    batch_limit: i64,
    page_size: i64,
    poll_interval: Duration,
}

impl ImportProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        resolver: Arc<MappingResolver>,
        writer: Arc<GraphWriter>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<EventBus>,
        batch_limit: i64,
        page_size: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            resolver,
            writer,
            blobs,
            events,
            batch_limit: batch_limit.max(1),
            page_size: page_size.max(1),
            poll_interval,
        }
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    /// Run the polling loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_limit = self.batch_limit,
            "Import processor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Import processor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.process_pending().await {
                        tracing::error!(error = %e, "Import processing cycle failed");
                    }
                }
            }
        }
    }

    /// Consume jobs pushed by ingress until the channel closes or the token
    /// is triggered.
    pub async fn consume(&self, mut jobs: mpsc::Receiver<ProcessJob>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    if let Err(e) = self.handle_job(job).await {
                        tracing::error!(error = %e, "Process job failed");
                    }
                }
            }
        }
        tracing::info!("Process queue consumer stopped");
    }

    pub async fn handle_job(&self, job: ProcessJob) -> PipelineResult<()> {
        match job {
            ProcessJob::Import { import_id } => self.process_import(import_id).await.map(|_| ()),
            ProcessJob::Record {
                data_source_id,
                import_id,
                data,
            } => self
                .process_transient_record(data_source_id, import_id, &data)
                .await
                .map(|_| ()),
        }
    }

    /// One poll: a pass over each of the oldest processable imports.
    ///
    /// A failing import does not stop the others; only losing the database
    /// connection ends the poll early. Returns how many imports were passed
    /// over (skipped ones excluded).
    pub async fn process_pending(&self) -> PipelineResult<usize> {
        let imports = {
            let mut conn = self.pool.acquire().await?;
            ImportRepo::list_processable(&mut conn, self.batch_limit).await?
        };

        let mut processed = 0;
        for import in imports {
            match self.process_import(import.id).await {
                Ok(PassOutcome::Processed { .. }) => processed += 1,
                Ok(PassOutcome::Skipped) => {}
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => {
                    tracing::error!(import_id = import.id, error = %e, "Import pass failed");
                }
            }
        }
        Ok(processed)
    }

    // -----------------------------------------------------------------------
    // One pass
    // -----------------------------------------------------------------------

    pub async fn process_import(&self, import_id: DbId) -> PipelineResult<PassOutcome> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;

        let import = match ImportRepo::lock_nowait(&mut tx, import_id).await {
            Ok(Some(import)) => import,
            Ok(None) => return Ok(PassOutcome::Skipped),
            Err(e) if strata_db::is_lock_unavailable(&e) => {
                tracing::debug!(import_id, "Import locked by another worker, skipping");
                return Ok(PassOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        if import.state().map_or(true, ImportState::is_terminal) {
            return Ok(PassOutcome::Skipped);
        }

        let mut schemas = SchemaMemo::default();
        let mut inserted: u64 = 0;
        let mut failed: u64 = 0;
        let mut after_id: DbId = 0;

        loop {
            let page = DataStagingRepo::list_unresolved_page(&mut tx, import.id, after_id, self.page_size).await?;
            let Some(last) = page.last() else { break };
            after_id = last.id;

            let mut done = Vec::with_capacity(page.len());
            for row in &page {
                let mut savepoint = tx.begin().await.map_err(PipelineError::transaction)?;
                match self.process_row(&mut savepoint, row, &mut schemas).await {
                    Ok(_) => {
                        savepoint.commit().await.map_err(PipelineError::transaction)?;
                        done.push(row.id);
                    }
                    Err(e) if e.is_record_error() => {
                        savepoint.rollback().await.map_err(PipelineError::transaction)?;
                        tracing::debug!(import_id, data_staging_id = row.id, error = %e, "Record not inserted");
                        DataStagingRepo::set_errors(&mut tx, row.id, &[e.to_string()]).await?;
                        failed += 1;
                    }
                    Err(e) => {
                        drop(savepoint);
                        if let Err(rollback) = tx.rollback().await {
                            tracing::warn!(import_id, error = %rollback, "Rollback failed");
                        }
                        self.record_row_error(row.id, &e).await;
                        return Err(e);
                    }
                }
            }

            let marked = DataStagingRepo::mark_inserted(&mut tx, &done).await?;
            ImportRepo::add_records_inserted(&mut tx, import.id, i64::try_from(marked).unwrap_or(i64::MAX))
                .await?;
            inserted += marked;

            if i64::try_from(page.len()).unwrap_or(i64::MAX) < self.page_size {
                break;
            }
        }

        let unresolved = DataStagingRepo::count_unresolved(&mut tx, import.id).await?;
        let state = ImportState::after_pass(unresolved);
        ImportRepo::set_status(&mut tx, import.id, ImportStatus::from(state), None).await?;
        tx.commit().await.map_err(PipelineError::transaction)?;

        tracing::info!(import_id, inserted, failed, unresolved, status = %state, "Import pass finished");
        if state == ImportState::Completed {
            let total = import.records_inserted.saturating_add(i64::try_from(inserted).unwrap_or(i64::MAX));
            self.events.publish(PipelineEvent::import_completed(import.id, total));
        }
        Ok(PassOutcome::Processed { inserted, failed, state })
    }

    /// Keep the failure on the row after its pass was rolled back.
    async fn record_row_error(&self, data_staging_id: DbId, err: &PipelineError) {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            DataStagingRepo::add_error(&mut conn, data_staging_id, &err.to_string()).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(data_staging_id, error = %e, "Could not record row error");
        }
    }

    async fn process_row(
        &self,
        conn: &mut PgConnection,
        row: &DataStaging,
        schemas: &mut SchemaMemo,
    ) -> PipelineResult<RecordWrites> {
        let mapping = self
            .resolver
            .find_by_shape_hash(conn, row.data_source_id, &row.shape_hash, true)
            .await?
            .filter(|m| m.is_usable())
            .ok_or_else(|| PipelineError::Configuration(NO_TRANSFORMATIONS_ERROR.to_string()))?;

        let files: Vec<DbId> = if row.file_attached {
            self.blobs
                .staged_files(conn, row.id)
                .await?
                .iter()
                .map(|f| f.id)
                .collect()
        } else {
            Vec::new()
        };

        let record = StagingContext {
            data_source_id: row.data_source_id,
            import_id: Some(row.import_id),
            data_staging_id: Some(row.id),
            data: &row.data,
        };
        self.write_record(conn, &mapping, &record, &files, schemas).await
    }

    /// Run every live transformation of `mapping` over one record and write
    /// the result. Nodes go first so edges of the same record can find them.
    async fn write_record(
        &self,
        conn: &mut PgConnection,
        mapping: &TypeMapping,
        record: &StagingContext<'_>,
        files: &[DbId],
        schemas: &mut SchemaMemo,
    ) -> PipelineResult<RecordWrites> {
        let ontology = self.writer.ontology().as_ref();
        let mut nodes = Vec::new();
        let mut edges: Vec<EdgeDraft> = Vec::new();

        for transformation in mapping.live_transformations() {
            let output = match &transformation.target {
                TransformationTarget::Node { metatype_id } => {
                    let metatype = schemas.metatype(ontology, *metatype_id).await?;
                    apply_transformation(transformation, record, TargetSchema::Metatype(&metatype))?
                }
                TransformationTarget::Edge(target) => {
                    let pair = schemas.pair(ontology, target.relationship_pair_id).await?;
                    apply_transformation(transformation, record, TargetSchema::RelationshipPair(&pair))?
                }
            };
            match output {
                TransformOutput::Nodes(n) => nodes.extend(n),
                TransformOutput::Edges(e) => edges.extend(e),
            }
        }

        let mut writes = RecordWrites::default();
        for node in self.writer.save_nodes(conn, nodes).await? {
            self.blobs.attach_to_node(conn, node.id, files).await?;
            writes.nodes += 1;
        }

        let mut queued = Vec::new();
        for edge in edges {
            if edge.has_parameters() {
                queued.push(edge);
                continue;
            }
            match self.writer.save_edge(conn, &edge).await {
                Ok(saved) => {
                    self.blobs.attach_to_edge(conn, saved.id, files).await?;
                    writes.edges += 1;
                }
                Err(PipelineError::Resolution(reason)) => {
                    tracing::debug!(pair_id = edge.relationship_pair_id, %reason, "Edge queued for later resolution");
                    queued.push(edge);
                }
                Err(e) => return Err(e),
            }
        }

        let items: Vec<CreateEdgeQueueItem> = queued
            .into_iter()
            .map(|edge| CreateEdgeQueueItem {
                import_id: record.import_id,
                data_staging_id: record.data_staging_id,
                edge,
                file_attached: !files.is_empty(),
            })
            .collect();
        writes.queued_edges = usize::try_from(EdgeQueueRepo::enqueue_many(conn, &items).await?).unwrap_or(items.len());
        Ok(writes)
    }

    /// Transform and write a record of a zero-retention source. Nothing is
    /// staged; a record whose shape has no usable mapping is dropped with an
    /// error.
    pub async fn process_transient_record(
        &self,
        data_source_id: DbId,
        import_id: DbId,
        data: &Value,
    ) -> PipelineResult<RecordWrites> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;
        let source = DataSourceRepo::find_by_id(&mut tx, data_source_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("data source {data_source_id} not found")))?;

        let hash = shape_hash(data, &source.shape_hash_options());
        let resolution = self
            .resolver
            .resolve_for_staging(&mut tx, source.container_id, source.id, import_id, &hash, data)
            .await?;
        if !resolution.is_usable() {
            tx.commit().await.map_err(PipelineError::transaction)?;
            self.resolver.announce_created(&resolution);
            return Err(PipelineError::Configuration(NO_TRANSFORMATIONS_ERROR.to_string()));
        }

        let record = StagingContext {
            data_source_id,
            import_id: Some(import_id),
            data_staging_id: None,
            data,
        };
        let mut schemas = SchemaMemo::default();
        let writes = self
            .write_record(&mut tx, &resolution.mapping, &record, &[], &mut schemas)
            .await?;
        ImportRepo::add_records_inserted(&mut tx, import_id, 1).await?;
        tx.commit().await.map_err(PipelineError::transaction)?;
        Ok(writes)
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    async fn end_import(&self, import_id: DbId, state: ImportState, message: Option<&str>) -> PipelineResult<Import> {
        let mut conn = self.pool.acquire().await?;
        let import = ImportRepo::find_by_id(&mut conn, import_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("import {import_id} not found")))?;
        if let Some(current) = import.state().filter(|s| s.is_terminal()) {
            return Err(PipelineError::Validation(format!("import {import_id} is already {current}")));
        }

        // Waits for a running pass to release the row.
        ImportRepo::set_status(&mut conn, import_id, ImportStatus::from(state), message).await?;
        let import = ImportRepo::find_by_id(&mut conn, import_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("import {import_id} not found")))?;

        tracing::info!(import_id, status = %state, "Import ended by operator");
        if state.notifies_completion() {
            let event = match state {
                ImportState::Stopped => PipelineEvent::import_stopped(import_id, message),
                _ => PipelineEvent::import_failed(import_id, message),
            };
            self.events.publish(event);
        }
        Ok(import)
    }

    pub async fn stop_import(&self, import_id: DbId, message: Option<&str>) -> PipelineResult<Import> {
        self.end_import(import_id, ImportState::Stopped, message).await
    }

    pub async fn fail_import(&self, import_id: DbId, message: Option<&str>) -> PipelineResult<Import> {
        self.end_import(import_id, ImportState::Error, message).await
    }

    /// Put every row of an import back to pending and reopen it. Returns how
    /// many rows were reset.
    pub async fn reprocess_import(&self, import_id: DbId) -> PipelineResult<u64> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;
        if ImportRepo::find_by_id(&mut tx, import_id).await?.is_none() {
            return Err(PipelineError::Resolution(format!("import {import_id} not found")));
        }
        let reset = DataStagingRepo::reset_import(&mut tx, import_id).await?;
        ImportRepo::set_status(&mut tx, import_id, ImportStatus::Processing, None).await?;
        tx.commit().await.map_err(PipelineError::transaction)?;

        tracing::info!(import_id, rows = reset, "Import queued for reprocessing");
        Ok(reset)
    }
}
