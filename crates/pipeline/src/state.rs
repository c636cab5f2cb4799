use std::sync::Arc;

use strata_db::DbPool;
use strata_events::EventBus;

use crate::blob::BlobStore;
use crate::cache::MappingCache;
use crate::config::IngestConfig;
use crate::edge_queue::EdgeQueueWorker;
use crate::graph_writer::GraphWriter;
use crate::ingress::DataSourceIngress;
use crate::ontology::Ontology;
use crate::process_queue::ProcessQueue;
use crate::processor::ImportProcessor;
use crate::resolver::MappingResolver;

/// Every pipeline component, wired once at process start.
///
/// Cheaply cloneable (all components are behind `Arc`).
#[derive(Clone)]
pub struct PipelineState {
    pub pool: DbPool,
    pub config: Arc<IngestConfig>,
    pub events: Arc<EventBus>,
    pub resolver: Arc<MappingResolver>,
    pub writer: Arc<GraphWriter>,
    pub ingress: Arc<DataSourceIngress>,
    pub processor: Arc<ImportProcessor>,
    pub edge_queue: Arc<EdgeQueueWorker>,
}

impl PipelineState {
    pub fn new(
        pool: DbPool,
        config: IngestConfig,
        ontology: Arc<dyn Ontology>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn ProcessQueue>,
        events: Arc<EventBus>,
    ) -> Self {
        let resolver = Arc::new(MappingResolver::new(
            pool.clone(),
            MappingCache::new(config.mapping_cache_ttl),
            Arc::clone(&events),
        ));
        let writer = Arc::new(GraphWriter::new(ontology, config.edge_insertion_chunk_size));
        let ingress = Arc::new(DataSourceIngress::new(
            pool.clone(),
            Arc::clone(&resolver),
            queue,
            Arc::clone(&events),
            config.buffer_size,
        ));
        let processor = Arc::new(ImportProcessor::new(
            pool.clone(),
            Arc::clone(&resolver),
            Arc::clone(&writer),
            Arc::clone(&blobs),
            Arc::clone(&events),
            config.import_batch_limit,
            config.staging_page_size,
            config.import_poll_interval,
        ));
        let edge_queue = Arc::new(EdgeQueueWorker::new(
            pool.clone(),
            Arc::clone(&writer),
            blobs,
            Arc::clone(&events),
            config.edge_queue,
            config.edge_queue_batch_size,
            config.edge_queue_poll_interval,
        ));

        Self {
            pool,
            config: Arc::new(config),
            events,
            resolver,
            writer,
            ingress,
            processor,
            edge_queue,
        }
    }
}
