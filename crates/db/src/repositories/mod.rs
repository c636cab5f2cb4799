//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that take
//! `&mut PgConnection` as the first argument, so the same call works on a
//! pooled connection or inside a caller's transaction (`&mut *tx`).
//! [`ImportEventRepo`] is the exception: audit rows are written outside any
//! pipeline transaction and take `&PgPool`.

pub mod data_source_repo;
pub mod data_staging_repo;
pub mod edge_queue_repo;
pub mod edge_repo;
pub mod file_repo;
pub mod import_event_repo;
pub mod import_repo;
pub mod node_repo;
pub mod ontology_repo;
pub mod type_mapping_repo;
pub mod type_transformation_repo;

pub use data_source_repo::DataSourceRepo;
pub use data_staging_repo::DataStagingRepo;
pub use edge_queue_repo::EdgeQueueRepo;
pub use edge_repo::EdgeRepo;
pub use file_repo::FileRepo;
pub use import_event_repo::ImportEventRepo;
pub use import_repo::ImportRepo;
pub use node_repo::NodeRepo;
pub use ontology_repo::OntologyRepo;
pub use type_mapping_repo::TypeMappingRepo;
pub use type_transformation_repo::TypeTransformationRepo;
