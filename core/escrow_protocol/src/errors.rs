//! Core error taxonomy.
//!
//! Validation errors are returned synchronously and never leave a partial
//! mutation behind. `AlreadyApproved` deliberately does not exist: a
//! repeated approval from the same party is a success no-op so retried
//! network calls cannot corrupt state.

use thiserror::Error;

use crate::types::ProjectId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    #[error("amount must be positive")]
    InvalidAmount,

    #[error("fee or penalty cap exceeds 100 percent")]
    InvalidFee,

    #[error("note longer than {0} bytes")]
    NoteTooLong(usize),

    #[error("operation not permitted: expected {expected}, found {actual}")]
    IllegalState {
        expected: &'static str,
        actual: String,
    },

    #[error("caller is not the assigned worker")]
    NotAssignedWorker,

    #[error("caller is not the project funder")]
    NotFunder,

    #[error("milestone has already been released")]
    AlreadyReleased,

    #[error("settlement collaborator did not confirm in time")]
    SettlementTimeout,

    #[error("milestone percentages sum to {sum_bps} bps, expected 10000")]
    PercentageMismatch { sum_bps: u32 },

    #[error("a non-empty reason is required")]
    MissingReason,

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("milestone {index} not found on project {project}")]
    MilestoneNotFound { project: ProjectId, index: u32 },

    #[error("no pending settlement intent {0}")]
    UnknownIntent(u64),

    #[error("settlement collaborator rejected the call: {0}")]
    SettlementRejected(String),
}

impl EscrowError {
    pub(crate) fn illegal_state(expected: &'static str, actual: impl Into<String>) -> Self {
        EscrowError::IllegalState {
            expected,
            actual: actual.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
