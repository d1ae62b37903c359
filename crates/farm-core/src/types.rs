//! Shared types used across the balancer crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier of a job in the job-management system.
pub type JobId = String;

/// Unique identifier (host name) of a worker machine.
pub type WorkerName = String;

/// Plugin-info key that carries a job's license cap by default.
pub const DEFAULT_LICENSE_LIMIT_KEY: &str = "LicenseLimit";

/// Lifecycle state of a job as reported by the job repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Active,
    Suspended,
    Pending,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Active => "Active",
            JobState::Suspended => "Suspended",
            JobState::Pending => "Pending",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(JobState::Active),
            "suspended" => Ok(JobState::Suspended),
            "pending" => Ok(JobState::Pending),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// What to do when every job in a run has priority zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroPriorityPolicy {
    /// Weight every job equally.
    #[default]
    EvenSplit,
    /// Fail the run without publishing anything.
    Abort,
}

impl fmt::Display for ZeroPriorityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroPriorityPolicy::EvenSplit => f.pad("even_split"),
            ZeroPriorityPolicy::Abort => f.pad("abort"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_parses_case_insensitively() {
        assert_eq!("Active".parse::<JobState>().unwrap(), JobState::Active);
        assert_eq!("suspended".parse::<JobState>().unwrap(), JobState::Suspended);
        assert!("rendering".parse::<JobState>().is_err());
    }

    #[test]
    fn job_state_display_round_trips() {
        for state in [
            JobState::Active,
            JobState::Suspended,
            JobState::Pending,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
    }

    #[test]
    fn zero_priority_policy_defaults_to_even_split() {
        assert_eq!(ZeroPriorityPolicy::default(), ZeroPriorityPolicy::EvenSplit);
        assert_eq!(ZeroPriorityPolicy::Abort.to_string(), "abort");
    }
}
