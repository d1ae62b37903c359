//! farm-allocator — computes how many workers each active job may use.
//!
//! A pure function of (jobs, active worker count, zero-priority policy).
//! No I/O and no state survives a call; the caller publishes the result.
//!
//! # Allocation Algorithm
//!
//! ```text
//! W     = active workers
//! total = sum(priority)
//!
//! pass 1   raw   = max(1, ceil(priority * W / total))
//!          limit = min(raw, license_limit)
//!
//! pass 1b  if pending_work < limit:
//!              reclaimed += limit - pending_work
//!              limit      = pending_work          // capped by work
//!
//! pass 2   for each job not capped by work, while pool > 0:
//!              extra = ceil(priority * reclaimed / total)
//!              extra = min(extra, pool, pending_work - limit)
//!              if limit + extra > license_limit: refuse (no partial fill)
//!              else limit += extra; pool -= extra
//! ```
//!
//! Redistribution is a single pass. Capacity refused by a license cap
//! stays unused for the run.
//!
//! When `total * (W + jobs)` would leave the finite `f64` range, every
//! priority is divided by the largest one before pass 1, so shares match
//! what exact arithmetic would give.

pub mod allocator;
pub mod demand;
pub mod error;

pub use allocator::{AllocationPlan, JobAllocation, RejectedJob, balance, balance_with};
pub use demand::{JobDemand, RawDemand, parse_license_limit, validate_demands};
pub use error::{AllocationError, AllocationResult};
