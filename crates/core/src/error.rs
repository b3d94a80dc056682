//! Error taxonomy shared by every certrack service.

use crate::enrollment::ProgressStatus;
use crate::prerequisite::MissingRequirement;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the template store, the enrollment engine and the aggregator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Malformed input: bad enum value, negative number, non-permutation reorder set
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown template / component / session / enrollment / progress id
    #[error("not found: {0}")]
    NotFound(String),

    /// Structural integrity violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Enrollment blocked by unmet prerequisites (lists every gap)
    #[error("prerequisites not met: {}", format_missing(.missing))]
    Prerequisite {
        /// Every unmet requirement
        missing: Vec<MissingRequirement>,
    },

    /// Status change not present in the transition table
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: ProgressStatus,
        /// Requested status
        to: ProgressStatus,
    },

    /// Retry or scoring attempted after the attempt budget was used up
    #[error("attempts exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted {
        /// Attempts already recorded
        attempts: u32,
        /// Attempt budget for the component
        max_attempts: u32,
    },

    /// Persistence failure; `transient` failures may be retried by the caller
    #[error("storage error: {message}")]
    Storage {
        /// Backend message
        message: String,
        /// Whether a retry can succeed
        transient: bool,
    },
}

impl EngineError {
    /// Shorthand for a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a not-found error.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Shorthand for a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }
}

fn format_missing(missing: &[MissingRequirement]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
