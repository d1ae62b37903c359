//! farm-balancer — wires the allocator to the job repository.
//!
//! A balancing run fetches the active jobs and the worker roster,
//! validates them, computes an `AllocationPlan` and publishes every
//! changed machine limit back through the repository.
//!
//! # Architecture
//!
//! ```text
//! EventHub ──(JobSubmitted / HouseCleaning)──> Balancer
//!   ▲                                            ├── JobRepository (read jobs + workers, write limits)
//!   │                                            └── farm-allocator::balance_with
//! HouseCleaning (periodic tick)
//! ```
//!
//! Failures never escape an event: the hub logs handler errors and
//! panics, and a failed write only affects the job it was for.

pub mod balancer;
pub mod error;
pub mod events;
pub mod housekeeping;
pub mod repository;

pub use balancer::{BalanceOptions, Balancer, FailedWrite, RunSummary};
pub use error::{BalanceError, BalanceResult};
pub use events::{DispatchReport, EventHub, FarmEvent, Subscription};
pub use housekeeping::HouseCleaning;
pub use repository::{JobRepository, StoreRepository};
