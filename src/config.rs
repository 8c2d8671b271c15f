//! Configuration management for windowguard.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WindowGuardError};

/// Prefix for environment variable overrides, e.g. `WINDOWGUARD_LIMIT`.
pub const ENV_PREFIX: &str = "WINDOWGUARD";

/// Source of the four values the limiter consumes.
///
/// The limiter reads each value once at construction and never writes back.
pub trait ConfigProvider {
    /// Admissions allowed per identity per period.
    fn limit(&self) -> u64;

    /// Period length in seconds.
    fn period_secs(&self) -> u64;

    /// How long to wait for the shared lock, in milliseconds.
    fn read_wait_tolerance_ms(&self) -> u64;

    /// How long to wait for the exclusive lock when rotating, in milliseconds.
    fn write_wait_tolerance_ms(&self) -> u64;
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admissions per identity within one period
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Period length in seconds
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Shared lock wait tolerance in milliseconds
    #[serde(default = "default_read_wait_tolerance")]
    pub read_wait_tolerance_ms: u64,

    /// Exclusive lock wait tolerance in milliseconds
    #[serde(default = "default_write_wait_tolerance")]
    pub write_wait_tolerance_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            period_secs: default_period_secs(),
            read_wait_tolerance_ms: default_read_wait_tolerance(),
            write_wait_tolerance_ms: default_write_wait_tolerance(),
        }
    }
}

fn default_limit() -> u64 {
    300
}

fn default_period_secs() -> u64 {
    2
}

fn default_read_wait_tolerance() -> u64 {
    100
}

fn default_write_wait_tolerance() -> u64 {
    200
}

impl LimiterConfig {
    /// Create a configuration with the given limit and period and default tolerances.
    pub fn new(limit: u64, period_secs: u64) -> Self {
        Self {
            limit,
            period_secs,
            ..Self::default()
        }
    }

    /// Set both lock wait tolerances.
    pub fn with_tolerances(mut self, read_ms: u64, write_ms: u64) -> Self {
        self.read_wait_tolerance_ms = read_ms;
        self.write_wait_tolerance_ms = write_ms;
        self
    }

    /// Snapshot the values exposed by a provider.
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Self {
        Self {
            limit: provider.limit(),
            period_secs: provider.period_secs(),
            read_wait_tolerance_ms: provider.read_wait_tolerance_ms(),
            write_wait_tolerance_ms: provider.write_wait_tolerance_ms(),
        }
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig = serde_yaml::from_str(yaml)
            .map_err(|e| WindowGuardError::Config(format!("Failed to parse limiter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `WINDOWGUARD_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = LimiterConfig::default();
        let mut builder = ::config::Config::builder()
            .set_default("limit", defaults.limit)?
            .set_default("period_secs", defaults.period_secs)?
            .set_default("read_wait_tolerance_ms", defaults.read_wait_tolerance_ms)?
            .set_default("write_wait_tolerance_ms", defaults.write_wait_tolerance_ms)?;

        if let Some(path) = path {
            info!(path = %path.display(), "Loading limiter configuration");
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let config: LimiterConfig = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(WindowGuardError::Config("limit must be greater than zero".into()));
        }
        if self.period_secs == 0 {
            return Err(WindowGuardError::Config("period_secs must be greater than zero".into()));
        }
        Ok(())
    }

    /// Period length in milliseconds.
    pub fn period_ms(&self) -> u64 {
        self.period_secs.saturating_mul(1000)
    }

    /// Shared lock wait tolerance.
    pub fn read_wait_tolerance(&self) -> Duration {
        Duration::from_millis(self.read_wait_tolerance_ms)
    }

    /// Exclusive lock wait tolerance.
    pub fn write_wait_tolerance(&self) -> Duration {
        Duration::from_millis(self.write_wait_tolerance_ms)
    }
}

impl ConfigProvider for LimiterConfig {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn period_secs(&self) -> u64 {
        self.period_secs
    }

    fn read_wait_tolerance_ms(&self) -> u64 {
        self.read_wait_tolerance_ms
    }

    fn write_wait_tolerance_ms(&self) -> u64 {
        self.write_wait_tolerance_ms
    }
}
