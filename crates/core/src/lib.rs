//! Pure domain logic for the strata ingestion pipeline.
//!
//! Nothing in this crate touches the database, the network or the async
//! runtime. It provides:
//!
//! - [`shape_hash`]: structural hashing of JSON payloads.
//! - [`ontology`]: metatype / relationship schema objects and property
//!   validation.
//! - [`conversion`]: per-data-type value coercion.
//! - [`transformation`]: the transformation engine turning one staged record
//!   into node or edge drafts.
//! - [`graph`]: node and edge drafts, composite identities.
//! - [`cardinality`]: relationship cardinality rules.
//! - [`import_status`]: the import state machine.
//! - [`edge_queue`]: retry backoff and re-queue policy for pending edges.
//! - [`mapping`]: transformation change-sets for type mapping saves.

pub mod cardinality;
pub mod conversion;
pub mod edge_queue;
pub mod error;
pub mod graph;
pub mod import_status;
pub mod mapping;
pub mod ontology;
pub mod shape_hash;
pub mod transformation;
pub mod types;
