//! TOML-based engine configuration.
//!
//! Stores the scheduler cadence, per-task intervals, and access-code
//! issuance parameters. Gateway credentials (mail relay endpoint/token,
//! Telegram bot token) live here too so the composition layer can build
//! the concrete senders from one file.
//!
//! Configuration is stored at `~/.config/vigil/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::storage::data_dir;

/// Scheduler and task cadence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Coarse ticker granularity for the dispatch loop (seconds).
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_ping_interval_mins")]
    pub ping_interval_mins: u64,
    /// Reminder task runs on a shorter interval than the ping task.
    #[serde(default = "default_reminder_interval_mins")]
    pub reminder_interval_mins: u64,
    #[serde(default = "default_activity_interval_mins")]
    pub activity_interval_mins: u64,
    #[serde(default = "default_trigger_interval_mins")]
    pub trigger_interval_mins: u64,
    #[serde(default = "default_timelock_interval_mins")]
    pub timelock_interval_mins: u64,
}

/// Access-code issuance parameters used by the delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCodeConfig {
    #[serde(default = "default_access_code_expiry_days")]
    pub expiry_days: i64,
    #[serde(default = "default_access_code_max_attempts")]
    pub max_attempts: u32,
}

/// Mail relay gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MailerConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub from_address: String,
}

/// Telegram gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/vigil/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub access_codes: AccessCodeConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

// Default functions
fn default_tick_secs() -> u64 {
    60
}
fn default_ping_interval_mins() -> u64 {
    60
}
fn default_reminder_interval_mins() -> u64 {
    15
}
fn default_activity_interval_mins() -> u64 {
    30
}
fn default_trigger_interval_mins() -> u64 {
    30
}
fn default_timelock_interval_mins() -> u64 {
    60
}
fn default_access_code_expiry_days() -> i64 {
    30
}
fn default_access_code_max_attempts() -> u32 {
    5
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            ping_interval_mins: default_ping_interval_mins(),
            reminder_interval_mins: default_reminder_interval_mins(),
            activity_interval_mins: default_activity_interval_mins(),
            trigger_interval_mins: default_trigger_interval_mins(),
            timelock_interval_mins: default_timelock_interval_mins(),
        }
    }
}

impl Default for AccessCodeConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_access_code_expiry_days(),
            max_attempts: default_access_code_max_attempts(),
        }
    }
}

impl EngineConfig {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config/vigil"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk, writing the defaults back on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Load from disk, returning defaults on any error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.schedule.tick_secs, 60);
        assert_eq!(parsed.access_codes.max_attempts, 5);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            [schedule]
            tick_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(parsed.schedule.tick_secs, 5);
        assert_eq!(parsed.schedule.reminder_interval_mins, 15);
        assert_eq!(parsed.access_codes.expiry_days, 30);
    }

    #[test]
    fn reminder_runs_more_often_than_pings() {
        let cfg = ScheduleConfig::default();
        assert!(cfg.reminder_interval_mins < cfg.ping_interval_mins);
    }
}
