//! farm-core — shared identifiers and `farm.toml` configuration for the
//! render farm balancer.

pub mod config;
pub mod types;

pub use config::{BalancerSettings, ConfigError, FarmConfig, HousekeepingSettings, parse_duration_secs};
pub use types::*;
