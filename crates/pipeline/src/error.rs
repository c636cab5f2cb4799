//! Pipeline error type.
//!
//! Variants follow how the pipeline reacts to them:
//!
//! | Variant | Reaction |
//! |---|---|
//! | `Validation`, `ConstraintViolation` | error recorded on the staging row, row skipped |
//! | `Resolution` | edge goes to (or stays in) the edge queue |
//! | `Configuration` | error recorded, row skipped |
//! | `Transaction`, `Database` | the import's pass is rolled back |
//!
//! Only connection loss aborts a whole processing loop iteration.

use strata_core::error::CoreError;
use strata_core::transformation::TransformError;
use strata_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A referenced node, mapping or ontology object does not exist (yet).
    #[error("Unresolved reference: {0}")]
    Resolution(String),

    #[error(
        "relationship pair {pair_id} cardinality violated by edge {origin_id} -> {destination_id}"
    )]
    ConstraintViolation {
        pair_id: DbId,
        origin_id: DbId,
        destination_id: DbId,
    },

    /// Beginning or committing a transaction failed.
    #[error("Transaction error: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Process queue error: {0}")]
    Queue(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Wrap a failed `BEGIN` or `COMMIT`.
    pub fn transaction(err: sqlx::Error) -> Self {
        Self::Transaction(err)
    }

    /// Whether the database itself is unreachable.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::Transaction(e) | Self::Database(e) => strata_db::is_connection_error(e),
            _ => false,
        }
    }

    /// Whether the failure belongs to one record and should be recorded on
    /// it rather than abort the import.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Configuration(_)
                | Self::Resolution(_)
                | Self::ConstraintViolation { .. }
                | Self::Core(CoreError::Validation(_) | CoreError::Configuration(_))
        )
    }
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::TargetMismatch | TransformError::UnknownKey(_) | TransformError::Archived(_) => {
                Self::Configuration(err.to_string())
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for PipelineError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn transform_errors_are_classified() {
        assert_matches!(
            PipelineError::from(TransformError::MissingKey("a".into())),
            PipelineError::Validation(_)
        );
        assert_matches!(
            PipelineError::from(TransformError::TargetMismatch),
            PipelineError::Configuration(_)
        );
    }

    #[test]
    fn only_io_failures_are_connection_loss() {
        assert!(PipelineError::Database(sqlx::Error::PoolTimedOut).is_connection_loss());
        assert!(!PipelineError::Database(sqlx::Error::RowNotFound).is_connection_loss());
        assert!(!PipelineError::Validation("x".into()).is_connection_loss());
    }

    #[test]
    fn record_errors() {
        let violation = PipelineError::ConstraintViolation {
            pair_id: 1,
            origin_id: 2,
            destination_id: 3,
        };
        assert!(violation.is_record_error());
        assert_eq!(
            violation.to_string(),
            "relationship pair 1 cardinality violated by edge 2 -> 3"
        );
        assert!(!PipelineError::Database(sqlx::Error::RowNotFound).is_record_error());
    }
}
