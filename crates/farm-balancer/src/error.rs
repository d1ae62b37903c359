//! Balancer error types.

use farm_allocator::AllocationError;
use farm_core::JobId;
use thiserror::Error;

/// Errors that can occur during a balancing run.
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job}: machine limit write failed after {attempts} attempts: {last_error}")]
    WriteFailed {
        job: JobId,
        attempts: u32,
        last_error: String,
    },

    #[error("allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

pub type BalanceResult<T> = Result<T, BalanceError>;
