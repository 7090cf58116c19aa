//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are deterministic failures: retrying the same operation against the
/// same hierarchy state produces the same error. Transient storage conflicts
/// are modeled by the store layer, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. an empty entity name).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An operation required an existing group and none was found.
    #[error("group {0} does not exist")]
    MissingGroup(String),

    /// Re-parenting would make a group its own ancestor.
    #[error("setting the parent of {group} to {parent} would result in an inheritance cycle")]
    CycleDetected { group: String, parent: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn missing_group(name: impl Into<String>) -> Self {
        Self::MissingGroup(name.into())
    }

    pub fn cycle(group: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::CycleDetected {
            group: group.into(),
            parent: parent.into(),
        }
    }
}
