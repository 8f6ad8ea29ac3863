//! Configuration management for Matchroom
//!
//! This module provides:
//! - TOML loading with human-readable durations (`"60s"`, `"2m"`)
//! - Environment variable overrides
//! - Validation before anything is started

use crate::error::{Error, Result};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub coordinator: CoordinatorConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

/// Per-room behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a disconnected participant may take to come back.
    /// `None` (`"off"` in files) waits forever.
    #[serde(with = "optional_duration")]
    pub reconnect_window: Option<Duration>,
    /// How long a finished room stays joinable for late catch-ups
    #[serde(with = "humantime_serde")]
    pub retain_finished_for: Duration,
    /// Time the awaited role has to act. `None` (`"off"`) disables the clock.
    #[serde(with = "optional_duration")]
    pub turn_clock: Option<Duration>,
    pub room_mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_window: Some(Duration::from_secs(60)),
            retain_finished_for: Duration::from_secs(30),
            turn_clock: None,
            room_mailbox_capacity: 64,
        }
    }
}

/// Join replay for rooms that do not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(with = "humantime_serde")]
    pub pending_join_ttl: Duration,
    pub max_pending_joins: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pending_join_ttl: Duration::from_secs(10),
            max_pending_joins: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// Extra `target=level` directives
    pub directives: Vec<String>,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            with_target: false,
        }
    }
}

impl Config {
    /// Load from a file, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.override_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override configuration with environment variables
    pub fn override_from_env(&mut self) -> Result<()> {
        if let Ok(val) = env::var("MATCHROOM_RECONNECT_WINDOW") {
            self.session.reconnect_window = parse_optional_duration(&val)
                .map_err(|e| Error::Config(format!("Invalid reconnect window: {}", e)))?;
        }

        if let Ok(val) = env::var("MATCHROOM_RETAIN_FINISHED_FOR") {
            self.session.retain_finished_for = humantime::parse_duration(&val)
                .map_err(|e| Error::Config(format!("Invalid retention: {}", e)))?;
        }

        if let Ok(val) = env::var("MATCHROOM_TURN_CLOCK") {
            self.session.turn_clock = parse_optional_duration(&val)
                .map_err(|e| Error::Config(format!("Invalid turn clock: {}", e)))?;
        }

        if let Ok(val) = env::var("MATCHROOM_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.session.room_mailbox_capacity == 0 {
            return Err(Error::Config("Room mailbox capacity must be > 0".to_string()));
        }

        if self.session.reconnect_window == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Reconnect window must be > 0 (set it to \"off\" to wait forever)".to_string(),
            ));
        }

        if self.session.turn_clock == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Turn clock must be > 0 (set it to \"off\" to disable)".to_string(),
            ));
        }

        if self.coordinator.max_pending_joins == 0 {
            return Err(Error::Config("Max pending joins must be > 0".to_string()));
        }

        if self.coordinator.pending_join_ttl.is_zero() {
            return Err(Error::Config("Pending join TTL must be > 0".to_string()));
        }

        if self.events.channel_capacity == 0 {
            return Err(Error::Config("Event channel capacity must be > 0".to_string()));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Short timers for tests and demos
    pub fn testing_defaults() -> Self {
        Self {
            session: SessionConfig {
                reconnect_window: Some(Duration::from_secs(5)),
                retain_finished_for: Duration::from_secs(2),
                turn_clock: None,
                room_mailbox_capacity: 16,
            },
            coordinator: CoordinatorConfig {
                pending_join_ttl: Duration::from_secs(2),
                max_pending_joins: 64,
            },
            events: EventsConfig {
                channel_capacity: 256,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                ..LoggingConfig::default()
            },
        }
    }
}

/// `"off"`/`"none"` disable an optional timer
fn parse_optional_duration(val: &str) -> std::result::Result<Option<Duration>, humantime::DurationError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "off" | "none" | "" => Ok(None),
        other => humantime::parse_duration(other).map(Some),
    }
}

/// Optional timers in files: a humantime string, or `"off"` for `None`
mod optional_duration {
    use super::{humantime, parse_optional_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.collect_str(&humantime::format_duration(*duration)),
            None => serializer.serialize_str("off"),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_optional_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.session.room_mailbox_capacity = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.session.turn_clock = Some(Duration::ZERO);
        assert!(config.validate().is_err());

        config = Config::default();
        config.coordinator.max_pending_joins = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
reconnect_window = "90s"
turn_clock = "2m"

[logging]
level = "warn"
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.session.reconnect_window, Some(Duration::from_secs(90)));
        assert_eq!(config.session.turn_clock, Some(Duration::from_secs(120)));
        assert_eq!(config.session.retain_finished_for, Duration::from_secs(30));
        assert_eq!(config.coordinator, CoordinatorConfig::default());
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchroom.toml");

        let config = Config::testing_defaults();
        config.save(&path).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_disabled_timers_survive_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchroom.toml");

        let mut config = Config::default();
        config.session.reconnect_window = None;
        config.session.turn_clock = None;
        config.save(&path).unwrap();

        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("reconnect_window = \"off\""));
        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_off_in_file_disables_timers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[session]
reconnect_window = "off"
turn_clock = "None"
"#
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.reconnect_window, None);
        assert_eq!(config.session.turn_clock, None);
    }

    #[test]
    fn test_bad_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nreconnect_window = \"soon\"").unwrap();
        assert!(matches!(
            Config::load_from_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_optional_duration_parsing() {
        assert_eq!(parse_optional_duration("off").unwrap(), None);
        assert_eq!(
            parse_optional_duration("45s").unwrap(),
            Some(Duration::from_secs(45))
        );
        assert!(parse_optional_duration("later").is_err());
    }
}
