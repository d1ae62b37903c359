//! Error types for the farm repository.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// Failures of the embedded job and worker store.
///
/// redb reports many distinct error types; they are flattened to
/// strings here so callers only match on what went wrong, not where.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open farm store: {0}")]
    Open(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("corrupt record: {0}")]
    Decode(String),

    #[error("unknown job: {0}")]
    JobNotFound(String),
}
