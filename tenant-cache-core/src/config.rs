//! Configuration for a service's tenant cache.
//!
//! Loaded from a TOML file with [`TenantCacheConfig::from_path`] or from
//! `TENANT_CACHE_*` environment variables with [`TenantCacheConfig::from_env`].
//! Each consuming service constructs and injects its own instance; there is
//! no process-wide configuration.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_STORE_PATH: &str = "./data/tenant-cache";
pub const DEFAULT_MAP_SIZE_MB: usize = 64;
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_POLL_IDLE_MS: u64 = 50;
pub const DEFAULT_MONITOR_CHECK_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 60;
pub const DEFAULT_MAX_REPORTED: usize = 50;

/// Largest accepted LMDB map size (1 TiB).
pub const MAX_MAP_SIZE_MB: usize = 1024 * 1024;
/// Largest accepted staleness threshold (one year).
pub const MAX_STALE_THRESHOLD_MINUTES: i64 = 365 * 24 * 60;

/// How a gate resolves an infrastructure fault (store unreachable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Deny on fault. Required for security-sensitive gates (payments).
    #[default]
    Closed,
    /// Allow on fault. Only for low-risk read-only gates (availability display).
    Open,
}

impl FailMode {
    /// The decision to return when the store could not be read.
    pub fn fallback(&self) -> bool {
        matches!(self, FailMode::Open)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" => Some(FailMode::Closed),
            "open" => Some(FailMode::Open),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    pub map_size_mb: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Re-reads after an optimistic-lock conflict before giving up.
    pub max_conflict_retries: u32,
    /// Sleep when the channel has nothing to deliver.
    pub poll_idle_ms: u64,
}

impl SyncConfig {
    pub fn poll_idle(&self) -> Duration {
        Duration::from_millis(self.poll_idle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    pub fail_mode: FailMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    pub check_interval_secs: u64,
    pub stale_threshold_minutes: i64,
    /// Cap on per-tenant warnings logged each cycle.
    pub max_reported: usize,
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Master configuration for one service's tenant cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantCacheConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub gate: GateConfig,
    pub monitor: MonitorConfig,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from(DEFAULT_STORE_PATH),
                map_size_mb: DEFAULT_MAP_SIZE_MB,
            },
            sync: SyncConfig {
                max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
                poll_idle_ms: DEFAULT_POLL_IDLE_MS,
            },
            gate: GateConfig {
                fail_mode: FailMode::Closed,
            },
            monitor: MonitorConfig {
                check_interval_secs: DEFAULT_MONITOR_CHECK_INTERVAL_SECS,
                stale_threshold_minutes: DEFAULT_STALE_THRESHOLD_MINUTES,
                max_reported: DEFAULT_MAX_REPORTED,
            },
        }
    }
}

impl TenantCacheConfig {
    /// Load and validate a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TenantCacheConfig = toml::from_str(contents).map_err(|e| {
            ConfigError::Parse {
                reason: e.to_string(),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    /// - `TENANT_CACHE_STORE_PATH`: LMDB directory (default: ./data/tenant-cache)
    /// - `TENANT_CACHE_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `TENANT_CACHE_MAX_CONFLICT_RETRIES`: optimistic-lock retries (default: 3)
    /// - `TENANT_CACHE_POLL_IDLE_MS`: idle sleep between empty polls (default: 50)
    /// - `TENANT_CACHE_FAIL_MODE`: `closed` or `open` (default: closed)
    /// - `TENANT_CACHE_MONITOR_INTERVAL_SECS`: staleness check interval (default: 300)
    /// - `TENANT_CACHE_STALE_THRESHOLD_MINUTES`: staleness threshold (default: 60)
    /// - `TENANT_CACHE_MONITOR_MAX_REPORTED`: per-cycle warning cap (default: 50)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TenantCacheConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let fail_mode = match lookup("TENANT_CACHE_FAIL_MODE") {
            Some(raw) => FailMode::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                field: "gate.fail_mode",
                reason: format!("expected 'closed' or 'open', got '{raw}'"),
            })?,
            None => defaults.gate.fail_mode,
        };

        let config = Self {
            store: StoreConfig {
                path: lookup("TENANT_CACHE_STORE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.store.path),
                map_size_mb: parse_env(
                    &lookup,
                    "TENANT_CACHE_MAP_SIZE_MB",
                    "store.map_size_mb",
                    defaults.store.map_size_mb,
                )?,
            },
            sync: SyncConfig {
                max_conflict_retries: parse_env(
                    &lookup,
                    "TENANT_CACHE_MAX_CONFLICT_RETRIES",
                    "sync.max_conflict_retries",
                    defaults.sync.max_conflict_retries,
                )?,
                poll_idle_ms: parse_env(
                    &lookup,
                    "TENANT_CACHE_POLL_IDLE_MS",
                    "sync.poll_idle_ms",
                    defaults.sync.poll_idle_ms,
                )?,
            },
            gate: GateConfig { fail_mode },
            monitor: MonitorConfig {
                check_interval_secs: parse_env(
                    &lookup,
                    "TENANT_CACHE_MONITOR_INTERVAL_SECS",
                    "monitor.check_interval_secs",
                    defaults.monitor.check_interval_secs,
                )?,
                stale_threshold_minutes: parse_env(
                    &lookup,
                    "TENANT_CACHE_STALE_THRESHOLD_MINUTES",
                    "monitor.stale_threshold_minutes",
                    defaults.monitor.stale_threshold_minutes,
                )?,
                max_reported: parse_env(
                    &lookup,
                    "TENANT_CACHE_MONITOR_MAX_REPORTED",
                    "monitor.max_reported",
                    defaults.monitor.max_reported,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.store.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "store.map_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self.store.map_size_mb > MAX_MAP_SIZE_MB {
            return Err(ConfigError::InvalidValue {
                field: "store.map_size_mb",
                reason: format!("must be <= {MAX_MAP_SIZE_MB}"),
            });
        }
        if self.sync.poll_idle_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.poll_idle_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.monitor.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.check_interval_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.monitor.stale_threshold_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.stale_threshold_minutes",
                reason: "must be > 0".to_string(),
            });
        }
        if self.monitor.stale_threshold_minutes > MAX_STALE_THRESHOLD_MINUTES {
            return Err(ConfigError::InvalidValue {
                field: "monitor.stale_threshold_minutes",
                reason: format!("must be <= {MAX_STALE_THRESHOLD_MINUTES}"),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    field: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field,
            reason: format!("{key}='{raw}' is not a valid number"),
        }),
        None => Ok(default),
    }
}
