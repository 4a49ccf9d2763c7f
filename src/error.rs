use thiserror::Error;

use crate::geometry::Region;

/// Every way a demonstration can fail, one variant per failure mode so the
/// operator can tell a configuration problem from a bad plan or a bad page.
#[derive(Debug, Error)]
pub enum DemoError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid plan step {index}: field `{field}` {reason}")]
    PlanValidation {
        index: usize,
        field: &'static str,
        reason: String,
    },

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("element `{selector}` not found after {attempts} attempt(s)")]
    ElementNotFound { selector: String, attempts: u32 },

    #[error("coordinate ({x}, {y}) is outside monitor bounds {bounds}")]
    CoordinateOutOfBounds { x: i64, y: i64, bounds: Region },

    #[error("execution aborted: {0}")]
    ExecutionAborted(String),

    #[error("{collaborator} failed: {source:#}")]
    Collaborator {
        collaborator: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    PlanValidation,
    ElementNotFound,
    CoordinateOutOfBounds,
    ExecutionAborted,
    Collaborator,
}

impl DemoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DemoError::Configuration(_) => ErrorKind::Configuration,
            DemoError::PlanValidation { .. } | DemoError::MalformedPlan(_) => {
                ErrorKind::PlanValidation
            }
            DemoError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            DemoError::CoordinateOutOfBounds { .. } => ErrorKind::CoordinateOutOfBounds,
            DemoError::ExecutionAborted(_) => ErrorKind::ExecutionAborted,
            DemoError::Collaborator { .. } => ErrorKind::Collaborator,
        }
    }

    pub(crate) fn invalid(index: usize, field: &'static str, reason: impl Into<String>) -> Self {
        DemoError::PlanValidation {
            index,
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn collaborator(collaborator: &'static str, source: anyhow::Error) -> Self {
        DemoError::Collaborator {
            collaborator,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DemoError>;
