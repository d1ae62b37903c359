//! Records persisted by the farm repository.
//!
//! These mirror what the job-management system reports. Task counts are
//! signed on purpose: the repository stores whatever it is told, and the
//! allocator rejects nonsensical values at its own boundary.

use std::collections::HashMap;

use farm_core::{JobId, JobState, WorkerName};
use serde::{Deserialize, Serialize};

// ── Job ───────────────────────────────────────────────────────────

/// A render job and its current worker cap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    /// Relative weight against other active jobs.
    pub priority: f64,
    /// Tasks currently rendering.
    #[serde(default)]
    pub rendering_tasks: i64,
    /// Tasks waiting for a worker.
    #[serde(default)]
    pub queued_tasks: i64,
    #[serde(default)]
    pub completed_tasks: i64,
    /// Maximum number of workers the job may use concurrently.
    #[serde(default)]
    pub machine_limit: u32,
    /// Free-form plugin settings (e.g. `LicenseLimit`).
    #[serde(default)]
    pub plugin_info: HashMap<String, String>,
    /// Unix timestamp (seconds) of submission.
    #[serde(default)]
    pub submitted_at: u64,
}

impl JobRecord {
    /// Tasks not yet completed: rendering plus queued.
    pub fn pending_work(&self) -> i64 {
        self.rendering_tasks.saturating_add(self.queued_tasks)
    }

    /// Look up a plugin-info value; empty values read as absent.
    pub fn plugin_value(&self, key: &str) -> Option<&str> {
        self.plugin_info
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

// ── Worker ────────────────────────────────────────────────────────

/// A worker machine in the farm roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub name: WorkerName,
    pub is_active: bool,
    #[serde(default)]
    pub host: Option<String>,
    /// Unix timestamp of the last check-in.
    #[serde(default)]
    pub last_seen: u64,
}
