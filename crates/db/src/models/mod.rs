//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct per table and the
//! `Deserialize` DTOs used for inserts. JSONB columns holding structured
//! values use `sqlx::types::Json`.

pub mod data_source;
pub mod data_staging;
pub mod edge;
pub mod edge_queue;
pub mod file;
pub mod import;
pub mod import_event;
pub mod node;
pub mod ontology;
pub mod status;
pub mod type_mapping;
