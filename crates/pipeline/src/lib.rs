//! Orchestration of the strata ingestion pipeline.
//!
//! Data flows through the components in this order:
//!
//! 1. [`ingress`] stages raw records under an import.
//! 2. [`resolver`] maps each record's shape hash to a type mapping.
//! 3. [`processor`] runs the mapping's transformations over pending rows and
//!    hands the results to [`graph_writer`].
//! 4. [`edge_queue`] retries edges whose endpoints did not exist yet.
//!
//! [`PipelineState`] wires everything together with explicit dependencies.

pub mod blob;
pub mod cache;
pub mod config;
pub mod edge_queue;
pub mod error;
pub mod graph_writer;
pub mod ingress;
pub mod ontology;
pub mod process_queue;
pub mod processor;
pub mod resolver;
pub mod state;

pub use config::IngestConfig;
pub use error::{PipelineError, PipelineResult};
pub use state::PipelineState;
