//! farm.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DEFAULT_LICENSE_LIMIT_KEY, JobState, ZeroPriorityPolicy};

/// Errors raised while loading `farm.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    pub balancer: BalancerSettings,
    pub housekeeping: HousekeepingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerSettings {
    /// Job state whose members take part in balancing.
    pub active_state: JobState,
    /// Plugin-info key holding the per-job license cap.
    pub license_limit_key: String,
    pub zero_priority: ZeroPriorityPolicy,
    /// Attempts per job when publishing a machine limit.
    pub write_retries: u32,
    /// Apply the license cap to a newly submitted job before balancing.
    pub cap_on_submit: bool,
    /// Force a worker roster refresh on every run.
    pub invalidate_worker_cache: bool,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            active_state: JobState::Active,
            license_limit_key: DEFAULT_LICENSE_LIMIT_KEY.to_string(),
            zero_priority: ZeroPriorityPolicy::EvenSplit,
            write_retries: 3,
            cap_on_submit: true,
            invalidate_worker_cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingSettings {
    /// Tick interval, e.g. "60s" or "5m".
    pub interval: String,
}

impl Default for HousekeepingSettings {
    fn default() -> Self {
        Self {
            interval: "60s".to_string(),
        }
    }
}

impl HousekeepingSettings {
    /// The parsed interval. Only unvalidated settings can fail to parse;
    /// those use the 60 second default.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(parse_duration_secs(&self.interval).unwrap_or(60))
    }
}

impl FarmConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FarmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise fall back to the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.balancer.write_retries == 0 {
            return Err(ConfigError::Invalid(
                "balancer.write_retries must be at least 1".to_string(),
            ));
        }
        if self.balancer.license_limit_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "balancer.license_limit_key must not be empty".to_string(),
            ));
        }
        match parse_duration_secs(&self.housekeeping.interval) {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "housekeeping.interval {:?} is not a duration like \"30s\", \"5m\" or \"1h\"",
                    self.housekeeping.interval
                )));
            }
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "housekeeping.interval must be positive".to_string(),
                ));
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// Parse a duration string like "30s", "5m", "1h" or a bare "45" into
/// seconds. Returns `None` for anything else, including overflow.
pub fn parse_duration_secs(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last()? {
        (i, 's') => (&s[..i], 1),
        (i, 'm') => (&s[..i], 60),
        (i, 'h') => (&s[..i], 3600),
        _ => (s, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(unit)
}
