//! farm-state — embedded job and worker repository.
//!
//! Backed by [redb](https://docs.rs/redb). Holds the job records the
//! balancer reads (priority, task counts, plugin info) and writes
//! (`machine_limit`), plus the worker roster.
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by job id or worker name. `FarmStore` is `Clone` + `Send` +
//! `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::FarmStore;
pub use types::*;
