//! Writer and scheduler configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::key::Tier;
use crate::{Error, Result};

/// How often the shared scheduler evaluates time-based cycling.
pub const CYCLE_TIME_INTERVAL: Duration = Duration::from_secs(10);
/// Grace delay between archiving a segment and trimming the stream behind it.
pub const CLEANUP_DELAY: Duration = Duration::from_secs(60);
/// A record older than the previous one by more than this starts a new segment.
pub const TIME_TOLERANCE_NS: u64 = 1_000_000_000;
pub const DEFAULT_CYCLE_SIZE: u64 = 1_000_000_000;

/// Configuration for one segment writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Logical stream name, used in log messages.
    pub name: String,

    /// Bucket archived segments are uploaded to.
    /// Default: "logs"
    pub bucket: String,

    /// Key prefix inside the bucket; the first record's `YYYYMMDD` and the
    /// segment file name are appended to it.
    pub remote_dir: String,

    /// Directory for the active segment file.
    /// Default: the system temp directory
    pub local_dir: Option<PathBuf>,

    /// Labels placed between the timestamps and the tier suffix of the key,
    /// e.g. `[SCOPE, TARGET, PACKET]` for reducible tiers.
    pub labels: Vec<String>,

    /// Tier of the segments this writer produces.
    /// Default: raw
    pub tier: Tier,

    /// File extension override. Default: `log` for raw, `bin` otherwise.
    pub extension: Option<String>,

    /// Whether the writer starts with logging enabled.
    /// Default: true
    pub logging_enabled: bool,

    /// Seconds a segment may stay open before the scheduler cycles it.
    /// Must not be shorter than the scheduler tick interval.
    pub cycle_time_secs: Option<u64>,

    /// Byte size at which the next write starts a new segment.
    /// Default: 1 GB
    pub cycle_size: Option<u64>,

    /// UTC hour of a daily cycle; requires `cycle_minute`.
    pub cycle_hour: Option<u8>,

    /// UTC minute of a daily cycle (with `cycle_hour`) or of an hourly cycle.
    pub cycle_minute: Option<u8>,

    /// Grace delay before trimming offsets of an archived segment.
    /// Default: 60
    pub cleanup_delay_secs: u64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            name: "telemetry".to_string(),
            bucket: "logs".to_string(),
            remote_dir: String::new(),
            local_dir: None,
            labels: Vec::new(),
            tier: Tier::Raw,
            extension: None,
            logging_enabled: true,
            cycle_time_secs: None,
            cycle_size: Some(DEFAULT_CYCLE_SIZE),
            cycle_hour: None,
            cycle_minute: None,
            cleanup_delay_secs: CLEANUP_DELAY.as_secs(),
        }
    }
}

impl WriterConfig {
    pub fn new(name: impl Into<String>, remote_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remote_dir: remote_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn cycle_time(&self) -> Option<Duration> {
        self.cycle_time_secs.map(Duration::from_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }

    pub fn extension(&self) -> &str {
        self.extension
            .as_deref()
            .unwrap_or_else(|| self.tier.default_extension())
    }

    pub fn local_dir(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Checks the thresholds against the scheduler's tick interval.
    pub fn validate(&self, tick_interval: Duration) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig("name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\']) || self.name == ".." {
            return Err(Error::InvalidConfig(format!(
                "name {:?} is not a valid file name",
                self.name
            )));
        }
        if self.bucket.trim().is_empty() {
            return Err(Error::InvalidConfig("bucket must not be empty".to_string()));
        }
        if let Some(cycle_time) = self.cycle_time() {
            if cycle_time < tick_interval {
                return Err(Error::InvalidConfig(format!(
                    "cycle_time must be >= {}s",
                    tick_interval.as_secs_f64()
                )));
            }
        }
        if self.cycle_size == Some(0) {
            return Err(Error::InvalidConfig("cycle_size must be > 0".to_string()));
        }
        if let Some(hour) = self.cycle_hour {
            if hour > 23 {
                return Err(Error::InvalidConfig(format!("cycle_hour {hour} out of range")));
            }
            if self.cycle_minute.is_none() {
                return Err(Error::InvalidConfig(
                    "cycle_hour requires cycle_minute".to_string(),
                ));
            }
        }
        if let Some(minute) = self.cycle_minute {
            if minute > 59 {
                return Err(Error::InvalidConfig(format!(
                    "cycle_minute {minute} out of range"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the shared cycle scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Milliseconds between evaluation passes.
    /// Default: 10 000
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: CYCLE_TIME_INTERVAL.as_millis() as u64,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(tick_interval: Duration) -> Self {
        Self {
            tick_interval_ms: tick_interval.as_millis() as u64,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = WriterConfig::default();
        assert_eq!(config.cycle_size, Some(1_000_000_000));
        assert_eq!(config.cycle_time(), None);
        assert_eq!(config.cleanup_delay(), Duration::from_secs(60));
        assert_eq!(config.extension(), "log");
        assert!(config.logging_enabled);
        assert_eq!(SchedulerConfig::default().tick_interval(), Duration::from_secs(10));
    }

    #[test]
    fn reduced_tier_defaults_to_bin() {
        let config = WriterConfig {
            tier: Tier::Decom,
            ..WriterConfig::default()
        };
        assert_eq!(config.extension(), "bin");
    }

    #[test]
    fn validation_rejects_bad_thresholds() {
        let tick = CYCLE_TIME_INTERVAL;
        let mut config = WriterConfig::default();
        config.cycle_time_secs = Some(5);
        assert!(config.validate(tick).is_err());
        config.cycle_time_secs = Some(10);
        assert!(config.validate(tick).is_ok());

        config.cycle_hour = Some(3);
        assert!(config.validate(tick).is_err());
        config.cycle_minute = Some(60);
        assert!(config.validate(tick).is_err());
        config.cycle_minute = Some(30);
        assert!(config.validate(tick).is_ok());
        config.cycle_hour = Some(24);
        assert!(config.validate(tick).is_err());

        let zero = WriterConfig {
            cycle_size: Some(0),
            ..WriterConfig::default()
        };
        assert!(zero.validate(tick).is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: WriterConfig =
            serde_json::from_str(r#"{"name":"INST","cycle_time_secs":600,"tier":"decom"}"#)
                .unwrap();
        assert_eq!(config.name, "INST");
        assert_eq!(config.cycle_time(), Some(Duration::from_secs(600)));
        assert_eq!(config.tier, Tier::Decom);
        assert_eq!(config.cycle_size, Some(DEFAULT_CYCLE_SIZE));
    }
}
