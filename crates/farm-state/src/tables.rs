//! redb table definitions for the farm repository.

use redb::TableDefinition;

/// Every table maps a string key to a JSON-encoded record.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Job records keyed by job id.
pub const JOBS: RecordTable = TableDefinition::new("jobs");

/// Worker records keyed by worker name.
pub const WORKERS: RecordTable = TableDefinition::new("workers");
