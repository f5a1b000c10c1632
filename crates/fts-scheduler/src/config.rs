//! Scheduler configuration.

use std::time::Duration;

use fts_types::ScheduleSettings;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default timezone for jobs (IANA timezone string, e.g., "Europe/Berlin").
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// How long shutdown waits for an in-progress run to release the lock.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl From<&ScheduleSettings> for SchedulerConfig {
    fn from(settings: &ScheduleSettings) -> Self {
        Self {
            default_timezone: settings.timezone.clone(),
            shutdown_timeout_secs: settings.shutdown_timeout_secs,
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone string into a chrono_tz::Tz.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the timezone string
    /// is not a valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        parse_timezone(&self.default_timezone)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Parse an IANA timezone name.
pub(crate) fn parse_timezone(name: &str) -> Result<chrono_tz::Tz, SchedulerError> {
    name.parse::<chrono_tz::Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_from_schedule_settings() {
        let settings = ScheduleSettings {
            timezone: "Europe/Berlin".to_string(),
            shutdown_timeout_secs: 5,
            ..Default::default()
        };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.parse_timezone().unwrap().name(), "Europe/Berlin");
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn test_parse_invalid_timezone() {
        let config = SchedulerConfig {
            default_timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        match config.parse_timezone() {
            Err(SchedulerError::InvalidTimezone(tz)) => assert_eq!(tz, "Invalid/Zone"),
            other => panic!("Expected InvalidTimezone error, got {:?}", other),
        }
    }

    #[test]
    fn test_serde_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }
}
