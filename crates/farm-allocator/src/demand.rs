//! Boundary validation for allocator inputs.
//!
//! The job-management system reports priorities, task counts and
//! plugin settings as loosely typed values. Everything is checked here
//! before it can reach the shared totals of a run.

use farm_core::JobId;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::allocator::RejectedJob;
use crate::error::{AllocationError, AllocationResult};

/// Unvalidated job inputs as read from the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDemand {
    pub id: JobId,
    pub priority: f64,
    /// Rendering + queued tasks.
    pub pending_work: i64,
    /// Raw plugin-info value; absent or blank means unlimited.
    pub license_limit: Option<String>,
}

/// A validated job entering an allocation run.
///
/// Only `new` and `from_raw` build one, so every value reaching
/// `balance` has passed the boundary checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDemand {
    id: JobId,
    /// Non-negative, finite relative weight.
    priority: f64,
    pending_work: u32,
    /// Hard cap on concurrent workers; `None` is unlimited.
    license_limit: Option<u32>,
}

impl JobDemand {
    pub fn new(
        id: impl Into<JobId>,
        priority: f64,
        pending_work: u32,
        license_limit: Option<u32>,
    ) -> AllocationResult<Self> {
        let id = id.into();
        if !priority.is_finite() || priority < 0.0 {
            return Err(AllocationError::InvalidPriority {
                job: id,
                value: priority,
            });
        }
        if license_limit == Some(0) {
            return Err(AllocationError::InvalidLicenseLimit {
                job: id,
                value: "0".to_string(),
            });
        }
        Ok(Self {
            id,
            priority,
            pending_work,
            license_limit,
        })
    }

    /// Validate a raw repository reading.
    pub fn from_raw(raw: &RawDemand) -> AllocationResult<Self> {
        if raw.pending_work < 0 {
            return Err(AllocationError::InvalidPendingWork {
                job: raw.id.clone(),
                value: raw.pending_work,
            });
        }
        let license_limit = parse_license_limit(&raw.id, raw.license_limit.as_deref())?;
        let pending_work = u32::try_from(raw.pending_work).unwrap_or(u32::MAX);
        Self::new(raw.id.clone(), raw.priority, pending_work, license_limit)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn pending_work(&self) -> u32 {
        self.pending_work
    }

    pub fn license_limit(&self) -> Option<u32> {
        self.license_limit
    }
}

/// Parse a plugin-info license value.
///
/// Absent, empty or whitespace-only values mean unlimited. Anything else
/// must be a positive integer.
pub fn parse_license_limit(job: &str, raw: Option<&str>) -> AllocationResult<Option<u32>> {
    let Some(value) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match value.parse::<u32>() {
        Ok(limit) if limit > 0 => Ok(Some(limit)),
        _ => Err(AllocationError::InvalidLicenseLimit {
            job: job.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Validate every raw reading, splitting accepted jobs from rejected ones.
///
/// Rejected jobs are logged and left out of the run entirely.
pub fn validate_demands(raw: &[RawDemand]) -> (Vec<JobDemand>, Vec<RejectedJob>) {
    let mut accepted = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for reading in raw {
        match JobDemand::from_raw(reading) {
            Ok(demand) => accepted.push(demand),
            Err(error) => {
                warn!(job = %reading.id, %error, "job excluded from balancing");
                rejected.push(RejectedJob {
                    id: reading.id.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    (accepted, rejected)
}
