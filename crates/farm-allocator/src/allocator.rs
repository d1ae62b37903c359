//! Allocator: the two-pass priority-proportional balancing run.
//!
//! `balance` takes validated demands and the active worker count and
//! returns an `AllocationPlan` holding every job's final machine limit
//! together with the intermediate values that produced it.

use std::collections::BTreeMap;

use farm_core::{JobId, ZeroPriorityPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::demand::{JobDemand, RawDemand, validate_demands};
use crate::error::{AllocationError, AllocationResult};

/// Outcome of one allocation run for a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAllocation {
    pub id: JobId,
    /// Weight used for this run (1.0 for every job under the even-split fallback).
    pub weight: f64,
    /// `weight / total_priority`.
    pub share: f64,
    /// Proportional allocation after the at-least-one rule, before the license clamp.
    pub raw: u32,
    /// The license cap lowered the proportional allocation.
    pub license_clamped: bool,
    /// Pending work lowered the allocation; excluded from redistribution.
    pub capped_by_work: bool,
    /// Workers added from the reclaimed pool.
    pub extra: u32,
    /// A redistribution was refused because it would exceed the license cap.
    pub license_blocked: bool,
    /// Final machine limit.
    pub limit: u32,
}

/// A job excluded from the run because its inputs failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedJob {
    pub id: JobId,
    pub reason: String,
}

/// Result of one balancing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub active_workers: u32,
    /// Sum of the weights used for the run.
    pub total_priority: f64,
    /// The even-split fallback replaced an all-zero priority set.
    pub fallback: bool,
    /// Workers freed by jobs with too little pending work.
    pub reclaimed: u32,
    /// Part of `reclaimed` no job absorbed.
    pub unused_reclaimed: u32,
    /// One entry per accepted job, in input order.
    pub allocations: Vec<JobAllocation>,
    pub rejected: Vec<RejectedJob>,
}

impl AllocationPlan {
    fn empty(active_workers: u32) -> Self {
        Self {
            active_workers,
            total_priority: 0.0,
            fallback: false,
            reclaimed: 0,
            unused_reclaimed: 0,
            allocations: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Final machine limit for a job, if it took part in the run.
    pub fn limit_for(&self, job_id: &str) -> Option<u32> {
        self.allocations
            .iter()
            .find(|a| a.id == job_id)
            .map(|a| a.limit)
    }

    /// Job id → final machine limit.
    pub fn limits(&self) -> BTreeMap<JobId, u32> {
        self.allocations
            .iter()
            .map(|a| (a.id.clone(), a.limit))
            .collect()
    }
}

/// `ceil(weight * amount / total)`, saturating into `u32`.
fn proportional(weight: f64, amount: u32, total: f64) -> u32 {
    // Multiply before dividing so integral weights stay exact.
    (weight * f64::from(amount) / total).ceil() as u32
}

/// Per-job weights and their sum.
///
/// Weights are the priorities themselves unless `total * (workers + jobs)`
/// leaves the finite range, in which case every priority is divided by the
/// largest one first. Shares are unchanged by the rescale.
fn job_weights(jobs: &[JobDemand], active_workers: u32) -> (Vec<f64>, f64) {
    let weights: Vec<f64> = jobs.iter().map(JobDemand::priority).collect();
    let total: f64 = weights.iter().sum();
    let span = f64::from(active_workers) + jobs.len() as f64;
    if (total * span).is_finite() {
        return (weights, total);
    }

    let max = weights.iter().copied().fold(0.0_f64, f64::max);
    debug!(max, "priorities too large for exact arithmetic, rescaling");
    let scaled: Vec<f64> = weights.iter().map(|w| w / max).collect();
    let total = scaled.iter().sum();
    (scaled, total)
}

/// Compute every job's machine limit for one run.
///
/// An empty job list is a no-op. If every priority is zero the policy
/// decides between an even split and `AllocationError::DegenerateRun`.
pub fn balance(
    jobs: &[JobDemand],
    active_workers: u32,
    policy: ZeroPriorityPolicy,
) -> AllocationResult<AllocationPlan> {
    if jobs.is_empty() {
        debug!("no jobs to balance");
        return Ok(AllocationPlan::empty(active_workers));
    }

    // Priorities are validated non-negative, so a zero sum means all zero.
    let fallback = jobs.iter().all(|job| job.priority() == 0.0);
    let (weights, total_priority) = if fallback {
        match policy {
            ZeroPriorityPolicy::Abort => {
                warn!(jobs = jobs.len(), "total priority is zero, aborting run");
                return Err(AllocationError::DegenerateRun { jobs: jobs.len() });
            }
            ZeroPriorityPolicy::EvenSplit => {
                warn!(
                    jobs = jobs.len(),
                    "total priority is zero, splitting workers evenly"
                );
                (vec![1.0; jobs.len()], jobs.len() as f64)
            }
        }
    } else {
        job_weights(jobs, active_workers)
    };

    info!(
        jobs = jobs.len(),
        active_workers,
        total_priority,
        "starting allocation run"
    );

    // Pass 1: proportional base allocation, clamped by license.
    let mut allocations: Vec<JobAllocation> = jobs
        .iter()
        .zip(weights)
        .map(|(job, weight)| {
            let raw = proportional(weight, active_workers, total_priority).max(1);
            let mut limit = raw;
            let mut license_clamped = false;
            if let Some(license) = job.license_limit()
                && limit > license
            {
                limit = license;
                license_clamped = true;
            }
            debug!(job = %job.id(), raw, limit, "handing workers to job");
            JobAllocation {
                id: job.id().to_string(),
                weight,
                share: weight / total_priority,
                raw,
                license_clamped,
                capped_by_work: false,
                extra: 0,
                license_blocked: false,
                limit,
            }
        })
        .collect();

    // Pass 1b: jobs cannot use more workers than they have tasks.
    let mut reclaimed: u32 = 0;
    for (job, alloc) in jobs.iter().zip(allocations.iter_mut()) {
        let pending = job.pending_work();
        if pending < alloc.limit {
            reclaimed = reclaimed.saturating_add(alloc.limit - pending);
            debug!(
                job = %job.id(),
                from = alloc.limit,
                to = pending,
                "fewer tasks than workers, capping by pending work"
            );
            alloc.limit = pending;
            alloc.capped_by_work = true;
        }
    }

    // Pass 2: a single redistribution of the reclaimed pool.
    let mut pool = reclaimed;
    for (job, alloc) in jobs.iter().zip(allocations.iter_mut()) {
        if pool == 0 {
            break;
        }
        if alloc.capped_by_work {
            continue;
        }

        let headroom = job.pending_work().saturating_sub(alloc.limit);
        let extra = proportional(alloc.weight, reclaimed, total_priority)
            .min(pool)
            .min(headroom);
        if extra == 0 {
            continue;
        }

        if let Some(license) = job.license_limit()
            && alloc.limit.saturating_add(extra) > license
        {
            warn!(
                job = %job.id(),
                limit = alloc.limit,
                extra,
                license,
                "extra workers would exceed license limit, skipping"
            );
            alloc.license_blocked = true;
            continue;
        }

        debug!(job = %job.id(), extra, "handing extra workers to job");
        alloc.limit += extra;
        alloc.extra = extra;
        pool -= extra;
    }

    if pool > 0 {
        debug!(unused = pool, "reclaimed workers left unassigned");
    }

    Ok(AllocationPlan {
        active_workers,
        total_priority,
        fallback,
        reclaimed,
        unused_reclaimed: pool,
        allocations,
        rejected: Vec::new(),
    })
}

/// Validate arbitrary job and worker values, then run `balance`.
///
/// The accessors read each job's id, priority, pending work and raw
/// license value; `is_active` filters the worker roster. Jobs failing
/// validation are reported in `AllocationPlan::rejected` and take no part
/// in the run.
#[allow(clippy::too_many_arguments)]
pub fn balance_with<J, W>(
    jobs: &[J],
    workers: &[W],
    is_active: impl Fn(&W) -> bool,
    id_of: impl Fn(&J) -> JobId,
    priority_of: impl Fn(&J) -> f64,
    pending_work_of: impl Fn(&J) -> i64,
    license_limit_of: impl Fn(&J) -> Option<String>,
    policy: ZeroPriorityPolicy,
) -> AllocationResult<AllocationPlan> {
    let raw: Vec<RawDemand> = jobs
        .iter()
        .map(|job| RawDemand {
            id: id_of(job),
            priority: priority_of(job),
            pending_work: pending_work_of(job),
            license_limit: license_limit_of(job),
        })
        .collect();
    let (accepted, rejected) = validate_demands(&raw);

    let active = workers.iter().filter(|w| is_active(*w)).count();
    let active_workers = u32::try_from(active).unwrap_or(u32::MAX);

    let mut plan = balance(&accepted, active_workers, policy)?;
    plan.rejected = rejected;
    Ok(plan)
}
