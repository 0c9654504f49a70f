//! compactd.toml configuration.
//!
//! Every field has a default, so an absent file or an empty section is
//! valid. Durations are written as strings with an `ms`, `s`, `m` or `h`
//! suffix and checked by [`CompactdConfig::resolve`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::allow_list::AllowList;
use crate::backoff::BackoffConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job_tracker::MaintenanceParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactdConfig {
    pub scheduler: SchedulerConfig,
    pub discovery: DiscoveryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub lease_duration: String,
    pub planning_interval: String,
    pub compaction_wait_period: String,
    pub maintenance_interval: String,
    /// `0` leaves leases unbounded.
    pub max_leases: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration: "10m".into(),
            planning_interval: "1h".into(),
            compaction_wait_period: "15m".into(),
            maintenance_interval: "30s".into(),
            max_leases: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Local directory whose sub-directories are the tenants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_dir: Option<PathBuf>,
    pub interval: String,
    pub min_backoff: String,
    pub max_backoff: String,
    /// `0` retries the initial discovery forever.
    pub max_retries: u32,
    pub enabled_tenants: Vec<String>,
    pub disabled_tenants: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bucket_dir: None,
            interval: "5m".into(),
            min_backoff: "1s".into(),
            max_backoff: "1m".into(),
            max_retries: 0,
            enabled_tenants: Vec::new(),
            disabled_tenants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Configuration with every duration parsed and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub maintenance: MaintenanceParams,
    pub maintenance_interval: Duration,
    pub max_leases: usize,
    pub discovery_interval: Duration,
    pub backoff: BackoffConfig,
    pub allow_list: AllowList,
    pub bucket_dir: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl CompactdConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CompactdConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse every duration and check the values are usable.
    pub fn resolve(&self) -> SchedulerResult<ResolvedConfig> {
        let s = &self.scheduler;
        let d = &self.discovery;

        let maintenance = MaintenanceParams {
            lease_duration: non_zero("scheduler.lease_duration", &s.lease_duration)?,
            planning_interval: non_zero("scheduler.planning_interval", &s.planning_interval)?,
            compaction_wait_period: field("scheduler.compaction_wait_period", &s.compaction_wait_period)?,
        };
        let backoff = BackoffConfig {
            min_backoff: non_zero("discovery.min_backoff", &d.min_backoff)?,
            max_backoff: non_zero("discovery.max_backoff", &d.max_backoff)?,
            max_retries: d.max_retries,
        };
        if backoff.min_backoff > backoff.max_backoff {
            return Err(SchedulerError::Config(format!(
                "discovery.min_backoff ({}) exceeds discovery.max_backoff ({})",
                d.min_backoff, d.max_backoff
            )));
        }

        Ok(ResolvedConfig {
            maintenance,
            maintenance_interval: non_zero("scheduler.maintenance_interval", &s.maintenance_interval)?,
            max_leases: s.max_leases,
            discovery_interval: non_zero("discovery.interval", &d.interval)?,
            backoff,
            allow_list: AllowList::new(d.enabled_tenants.iter().cloned(), d.disabled_tenants.iter().cloned()),
            bucket_dir: d.bucket_dir.clone(),
            data_dir: self.storage.data_dir.clone(),
        })
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        self.resolve().map(|_| ())
    }
}

fn field(name: &str, value: &str) -> SchedulerResult<Duration> {
    parse_duration(value).map_err(|e| SchedulerError::Config(format!("{name}: {e}")))
}

fn non_zero(name: &str, value: &str) -> SchedulerResult<Duration> {
    let duration = field(name, value)?;
    if duration.is_zero() {
        return Err(SchedulerError::Config(format!("{name} must be greater than zero")));
    }
    Ok(duration)
}

/// Parse a duration string like "250ms", "30s", "5m" or "1h".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit_secs, millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0, true)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1, false)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60, false)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600, false)
    } else {
        return Err(format!("invalid duration {s:?}: expected a ms, s, m or h suffix"));
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    if millis {
        return Ok(Duration::from_millis(value));
    }
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration {s:?} is too large"))
}
