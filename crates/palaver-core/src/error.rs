use thiserror::Error;

use palaver_store::StoreError;

/// Reason codes for content-policy rejections.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("content is empty")]
    Empty,

    #[error("content exceeds the maximum length")]
    TooLong,

    #[error("content matches a spam pattern")]
    SpamSuspected,

    #[error("content is not a valid URL or file reference")]
    InvalidReference,
}

/// Errors surfaced by the domain operations.
///
/// Each variant maps onto a distinct, stable code so the caller can
/// translate failures mechanically.  `NotFound` deliberately conflates
/// "does not exist" with "precondition not met" to avoid leaking existence
/// information across authorization boundaries.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Referenced entity absent, or a state precondition no longer holds.
    #[error("Not found")]
    NotFound,

    /// The actor lacks rights over an existing entity.
    #[error("Forbidden")]
    Forbidden,

    /// The actor targeted themselves where that is disallowed.
    #[error("Self-reference not allowed")]
    SelfReference,

    /// A friendship row already exists for the pair, in any status.
    #[error("Relationship already exists")]
    RelationshipExists,

    /// Content policy rejection, with the reason code.
    #[error("Validation failed: {0}")]
    Validation(#[from] PolicyViolation),

    /// Concurrent-mutation precondition failure (e.g. a duplicate email
    /// registration losing the race).
    #[error("Conflict")]
    Conflict,

    /// Underlying storage failure.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::NotFound,
            other => CoreError::Store(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
