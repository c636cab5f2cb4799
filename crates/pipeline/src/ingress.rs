//! Data source ingress.
//!
//! Receives a stream of JSON records for one data source and stages them
//! under an import in a single transaction. Records are buffered and written
//! with one bulk insert per `buffer_size` records; each distinct shape of a
//! flushed batch is resolved to a type mapping right away.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde_json::Value;
use sqlx::PgConnection;
use strata_core::error::CoreError;
use strata_core::shape_hash::shape_hash;
use strata_core::types::DbId;
use strata_db::models::data_source::DataSource;
use strata_db::models::data_staging::{CreateDataStaging, DataStaging};
use strata_db::models::import::{CreateImport, Import};
use strata_db::repositories::{DataSourceRepo, DataStagingRepo, ImportRepo};
use strata_db::DbPool;
use strata_events::{EventBus, PipelineEvent};

use crate::error::{PipelineError, PipelineResult};
use crate::process_queue::{ProcessJob, ProcessQueue};
use crate::resolver::{MappingResolver, ShapeResolution};

/// Options of one [`DataSourceIngress::receive_data`] call.
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// Append to an existing import instead of creating one.
    pub import_id: Option<DbId>,
    pub reference: Option<String>,
    /// Return the staged rows instead of the import.
    pub return_staging_records: bool,
    /// Every record arrives with uploaded files.
    pub has_files: bool,
}

#[derive(Debug)]
pub enum ReceiveOutcome {
    Import(Import),
    Staged(Vec<DataStaging>),
}

impl ReceiveOutcome {
    pub fn import_id(&self) -> Option<DbId> {
        match self {
            Self::Import(import) => Some(import.id),
            Self::Staged(rows) => rows.first().map(|r| r.import_id),
        }
    }
}

/// Everything a flushed batch produced.
#[derive(Default)]
struct Flushed {
    staged: Vec<DataStaging>,
    created_mappings: Vec<ShapeResolution>,
    /// Records of zero-retention sources, queued once the import commits.
    jobs: Vec<ProcessJob>,
}

pub struct DataSourceIngress {
    pool: DbPool,
    resolver: Arc<MappingResolver>,
    queue: Arc<dyn ProcessQueue>,
    events: Arc<EventBus>,
    buffer_size: usize,
}

/// Turn a decoded JSON document into a record stream. A single object is a
/// batch of one.
pub fn records_from_value(payload: Value) -> PipelineResult<BoxStream<'static, PipelineResult<Value>>> {
    match payload {
        Value::Array(records) => Ok(stream::iter(records.into_iter().map(Ok)).boxed()),
        record @ Value::Object(_) => Ok(stream::once(async move { Ok(record) }).boxed()),
        other => Err(PipelineError::Validation(format!(
            "payload must be an array of objects, got {}",
            json_kind(&other)
        ))),
    }
}

pub fn records_from_json(bytes: &[u8]) -> PipelineResult<BoxStream<'static, PipelineResult<Value>>> {
    let payload: Value = serde_json::from_slice(bytes)
        .map_err(|e| PipelineError::Validation(format!("payload is not valid JSON: {e}")))?;
    records_from_value(payload)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl DataSourceIngress {
    pub fn new(
        pool: DbPool,
        resolver: Arc<MappingResolver>,
        queue: Arc<dyn ProcessQueue>,
        events: Arc<EventBus>,
        buffer_size: usize,
    ) -> Self {
        Self {
            pool,
            resolver,
            queue,
            events,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Stage every record of `payload` under one import.
    ///
    /// Either the whole stream is staged or nothing is: any invalid record
    /// rolls the transaction back. Records of zero-retention sources are
    /// pushed to the process queue instead of being staged, once the import
    /// has committed.
    pub async fn receive_data<S>(
        &self,
        data_source_id: DbId,
        mut payload: S,
        user: Option<&str>,
        options: ReceiveOptions,
    ) -> PipelineResult<ReceiveOutcome>
    where
        S: Stream<Item = PipelineResult<Value>> + Unpin + Send,
    {
        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;

        let source = DataSourceRepo::find_by_id(&mut tx, data_source_id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("data source {data_source_id} not found")))?;
        if !source.active {
            return Err(PipelineError::Validation(format!("data source {data_source_id} is not active")));
        }

        let import = match options.import_id {
            Some(import_id) => reusable_import(&mut tx, &source, import_id).await?,
            None => {
                ImportRepo::create(
                    &mut tx,
                    &CreateImport {
                        data_source_id,
                        reference: options.reference.clone(),
                        created_by: user.map(str::to_string),
                    },
                )
                .await?
            }
        };

        let mut buffer: Vec<Value> = Vec::with_capacity(self.buffer_size);
        let mut flushed = Flushed::default();
        let mut received: u64 = 0;

        while let Some(record) = payload.next().await {
            let record = record?;
            if !record.is_object() {
                return Err(PipelineError::Validation(format!(
                    "record {received} is {}, expected an object",
                    json_kind(&record)
                )));
            }
            received += 1;
            buffer.push(record);
            if buffer.len() >= self.buffer_size {
                let batch = std::mem::replace(&mut buffer, Vec::with_capacity(self.buffer_size));
                self.flush(&mut tx, &source, import.id, batch, options.has_files, &mut flushed)
                    .await?;
            }
        }
        if !buffer.is_empty() {
            self.flush(&mut tx, &source, import.id, buffer, options.has_files, &mut flushed)
                .await?;
        }

        let import = ImportRepo::find_by_id(&mut tx, import.id)
            .await?
            .ok_or_else(|| PipelineError::Resolution(format!("import {} vanished", import.id)))?;
        tx.commit().await.map_err(PipelineError::transaction)?;

        tracing::info!(
            data_source_id,
            import_id = import.id,
            records = received,
            staged = flushed.staged.len(),
            "Data received",
        );

        for resolution in &flushed.created_mappings {
            self.resolver.announce_created(resolution);
        }
        for job in flushed.jobs {
            self.queue.put(job).await?;
        }
        if source.persists_staging() && received > 0 {
            if let Err(e) = self.queue.put(ProcessJob::Import { import_id: import.id }).await {
                tracing::warn!(import_id = import.id, error = %e, "Could not queue import for processing");
            }
        }
        self.events
            .publish(PipelineEvent::data_ingested(data_source_id, import.id, received));

        if options.return_staging_records {
            Ok(ReceiveOutcome::Staged(flushed.staged))
        } else {
            Ok(ReceiveOutcome::Import(import))
        }
    }

    async fn flush(
        &self,
        conn: &mut PgConnection,
        source: &DataSource,
        import_id: DbId,
        records: Vec<Value>,
        has_files: bool,
        flushed: &mut Flushed,
    ) -> PipelineResult<()> {
        let count = i64::try_from(records.len()).unwrap_or(i64::MAX);

        if !source.persists_staging() {
            flushed.jobs.extend(records.into_iter().map(|data| ProcessJob::Record {
                data_source_id: source.id,
                import_id,
                data,
            }));
            ImportRepo::add_total_records(conn, import_id, count).await?;
            return Ok(());
        }

        let options = source.shape_hash_options();
        let hashed: Vec<(String, Value)> = tokio::task::spawn_blocking(move || {
            records
                .into_iter()
                .map(|record| (shape_hash(&record, &options), record))
                .collect()
        })
        .await
        .map_err(|e| CoreError::Internal(format!("shape hashing task failed: {e}")))?;

        let mut samples: BTreeMap<&str, &Value> = BTreeMap::new();
        for (hash, record) in &hashed {
            samples.entry(hash.as_str()).or_insert(record);
        }

        let rows: Vec<CreateDataStaging> = hashed
            .iter()
            .map(|(hash, record)| CreateDataStaging {
                data_source_id: source.id,
                import_id,
                shape_hash: hash.clone(),
                data: record.clone(),
                file_attached: has_files,
            })
            .collect();
        let staged = DataStagingRepo::bulk_create(conn, &rows).await?;

        for (hash, sample) in samples {
            let resolution = self
                .resolver
                .resolve_for_staging(conn, source.container_id, source.id, import_id, hash, sample)
                .await?;
            if resolution.created {
                flushed.created_mappings.push(resolution);
            }
        }

        ImportRepo::add_total_records(conn, import_id, count).await?;
        flushed.staged.extend(staged);
        Ok(())
    }
}

async fn reusable_import(conn: &mut PgConnection, source: &DataSource, import_id: DbId) -> PipelineResult<Import> {
    let import = ImportRepo::find_by_id(conn, import_id)
        .await?
        .ok_or_else(|| PipelineError::Resolution(format!("import {import_id} not found")))?;
    if import.data_source_id != source.id {
        return Err(PipelineError::Validation(format!(
            "import {import_id} belongs to data source {}, not {}",
            import.data_source_id, source.id
        )));
    }
    if let Some(state) = import.state().filter(|s| s.is_terminal()) {
        return Err(PipelineError::Validation(format!(
            "import {import_id} is {state} and cannot receive data"
        )));
    }
    Ok(import)
}
