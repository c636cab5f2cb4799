//! Import lifecycle.
//!
//! `ready → processing → {completed, error, stopped}`. The names match the
//! seeded rows of the `import_statuses` lookup table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const IMPORT_STATUS_READY: &str = "ready";
pub const IMPORT_STATUS_PROCESSING: &str = "processing";
pub const IMPORT_STATUS_ERROR: &str = "error";
pub const IMPORT_STATUS_STOPPED: &str = "stopped";
pub const IMPORT_STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Ready,
    Processing,
    Error,
    Stopped,
    Completed,
}

impl ImportState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => IMPORT_STATUS_READY,
            Self::Processing => IMPORT_STATUS_PROCESSING,
            Self::Error => IMPORT_STATUS_ERROR,
            Self::Stopped => IMPORT_STATUS_STOPPED,
            Self::Completed => IMPORT_STATUS_COMPLETED,
        }
    }

    /// Terminal imports are never picked up by the processing loop again
    /// unless an operator reprocesses them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Stopped | Self::Completed)
    }

    /// Error and stopped imports notify the event sink that ingestion ended.
    pub fn notifies_completion(self) -> bool {
        matches!(self, Self::Error | Self::Stopped)
    }

    /// Status to persist after a processing pass that left `unresolved`
    /// staging rows behind.
    pub fn after_pass(unresolved: i64) -> Self {
        if unresolved == 0 {
            Self::Completed
        } else {
            Self::Processing
        }
    }
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            IMPORT_STATUS_READY => Ok(Self::Ready),
            IMPORT_STATUS_PROCESSING => Ok(Self::Processing),
            IMPORT_STATUS_ERROR => Ok(Self::Error),
            IMPORT_STATUS_STOPPED => Ok(Self::Stopped),
            IMPORT_STATUS_COMPLETED => Ok(Self::Completed),
            other => Err(CoreError::Validation(format!("unknown import status `{other}`"))),
        }
    }
}
