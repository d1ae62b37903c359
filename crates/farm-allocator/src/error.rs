//! Allocation error types.

use farm_core::JobId;
use thiserror::Error;

/// Errors raised while validating inputs or computing an allocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("job {job}: invalid priority {value}")]
    InvalidPriority { job: JobId, value: f64 },

    #[error("job {job}: invalid pending work {value}")]
    InvalidPendingWork { job: JobId, value: i64 },

    #[error("job {job}: invalid license limit {value:?}")]
    InvalidLicenseLimit { job: JobId, value: String },

    #[error("total priority is zero across {jobs} active jobs")]
    DegenerateRun { jobs: usize },
}

impl AllocationError {
    /// True for per-job input errors, which exclude a single job rather
    /// than failing the run.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, AllocationError::DegenerateRun { .. })
    }
}

pub type AllocationResult<T> = Result<T, AllocationError>;
