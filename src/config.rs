//! Engine settings loaded with figment.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables prefixed with `OMDAQ_`:
//!
//! ```text
//! OMDAQ_DRAIN_MODE=polling
//! OMDAQ_HIT_PIPELINE_DEPTH=8
//! ```
//!
//! Every field has a default, so an empty or missing file yields
//! [`EngineSettings::default`].
//!
//! # Example
//! ```no_run
//! use omdaq::EngineSettings;
//!
//! let settings = EngineSettings::load_from("config/omdaq.toml")?;
//! println!("draining in {:?} mode", settings.drain_mode);
//! # Ok::<(), omdaq::error::ConfigError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "OMDAQ_";

/// How a running channel is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainMode {
    /// One blocking interval request per cycle, flushed as a batch
    Interval,
    /// Independent periodic reads per stream
    Polling,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// Single-line
    Compact,
    /// One JSON object per event
    Json,
}

/// Per-channel engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Drain strategy used once a run starts
    pub drain_mode: DrainMode,
    /// Slots in the interval batch
    pub interval_batch_capacity: usize,
    /// Boot-to-application attempts on the softboot path
    pub softboot_attempts: u32,
    /// Pause between softboot attempts
    pub softboot_backoff_ms: u64,
    /// Open-and-transition attempts after a softboot
    pub open_attempts: u32,
    /// Pause between open attempts
    pub open_backoff_ms: u64,
    /// Watchdog threshold while initializing
    pub init_watchdog_threshold_ms: u64,
    /// Hit read period in polling mode
    pub hit_period_ms: u64,
    /// Monitoring read period in polling mode
    pub moni_period_ms: u64,
    /// Supernova read period in polling mode
    pub supernova_period_ms: u64,
    /// Back-to-back hit requests per polling read
    pub hit_pipeline_depth: usize,
    /// Retry interval for empty reads on non-blocking links
    pub nonblocking_poll_ms: u64,
    /// Pause between supernova read attempts
    pub supernova_retry_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            drain_mode: DrainMode::Interval,
            interval_batch_capacity: 1000,
            softboot_attempts: 2,
            softboot_backoff_ms: 5000,
            open_attempts: 2,
            open_backoff_ms: 1000,
            init_watchdog_threshold_ms: 60_000,
            hit_period_ms: 10,
            moni_period_ms: 1000,
            supernova_period_ms: 1000,
            hit_pipeline_depth: 4,
            nonblocking_poll_ms: 10,
            supernova_retry_ms: 50,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl EngineSettings {
    /// Load from a TOML file plus `OMDAQ_` environment overrides, then
    /// validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Extract and validate settings from an assembled figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 7] = [
            ("interval_batch_capacity", self.interval_batch_capacity as u64),
            ("softboot_attempts", u64::from(self.softboot_attempts)),
            ("open_attempts", u64::from(self.open_attempts)),
            ("init_watchdog_threshold_ms", self.init_watchdog_threshold_ms),
            ("hit_period_ms", self.hit_period_ms),
            ("hit_pipeline_depth", self.hit_pipeline_depth as u64),
            ("nonblocking_poll_ms", self.nonblocking_poll_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        for (field, backoff) in [
            ("softboot_backoff_ms", self.softboot_backoff_ms),
            ("open_backoff_ms", self.open_backoff_ms),
        ] {
            if self.init_watchdog_threshold_ms <= backoff {
                return Err(ConfigError::Invalid {
                    field: "init_watchdog_threshold_ms",
                    message: format!(
                        "{} ms must exceed {} ({} ms)",
                        self.init_watchdog_threshold_ms, field, backoff
                    ),
                });
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid {
                field: "log_level",
                message: format!(
                    "'{}' is not one of: {}",
                    self.log_level,
                    valid_levels.join(", ")
                ),
            });
        }
        Ok(())
    }

    /// Pause between softboot attempts.
    pub fn softboot_backoff(&self) -> Duration {
        Duration::from_millis(self.softboot_backoff_ms)
    }

    /// Pause between open attempts.
    pub fn open_backoff(&self) -> Duration {
        Duration::from_millis(self.open_backoff_ms)
    }

    /// Watchdog threshold while initializing.
    pub fn init_watchdog_threshold(&self) -> Duration {
        Duration::from_millis(self.init_watchdog_threshold_ms)
    }

    /// Retry interval for empty non-blocking reads.
    pub fn nonblocking_poll(&self) -> Duration {
        Duration::from_millis(self.nonblocking_poll_ms)
    }

    /// Pause between supernova read attempts.
    pub fn supernova_retry(&self) -> Duration {
        Duration::from_millis(self.supernova_retry_ms)
    }
}
